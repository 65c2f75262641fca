//! The circuit arena: models in registration order, each owning its instances.
//!
//! A [`Circuit`] owns the node table, the matrix store, the state store and
//! the latest solution. Analyses drive it through the per-phase pass-throughs
//! below, which always visit models in the order they were added.

use std::fmt;
use std::rc::Rc;

use nodal_core::{
    AcLoadContext, ConvTestContext, ConvergenceChecker, Diagnostic, DiagnosticSink, Error as CoreError,
    InstanceRef, Integrator, LoadContext, MatrixStore, Mode, NodeId, NodeTable, Origin, ParamList,
    ParamValue, PzLoadContext, SetupContext, SimOptions, StateStore, TempContext, TruncContext,
};
use nodal_devices::{DeviceKind, DeviceModel, DeviceRegistry, LoadStatus};
use num_complex::Complex64;

use crate::error::{Error, Result};
use crate::transient::InitialConditions;

struct ModelEntry {
    kind: Rc<dyn DeviceKind>,
    model: Box<dyn DeviceModel>,
}

/// Outcome of one evaluation pass over every model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadPass {
    pub status: LoadStatus,
    /// Instances that reused their previous evaluation.
    pub bypassed: usize,
}

/// Device models, their instances and the shared solve state.
pub struct Circuit {
    nodes: NodeTable,
    models: Vec<ModelEntry>,
    pub(crate) matrix: MatrixStore,
    pub(crate) states: StateStore,
    options: SimOptions,
    /// Latest accepted or iterated solution, indexed by matrix row.
    pub(crate) solution: Vec<f64>,
    dirty: bool,
}

impl fmt::Debug for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Circuit")
            .field("unknowns", &self.nodes.num_unknowns())
            .field(
                "models",
                &self.models.iter().map(|m| m.model.name()).collect::<Vec<_>>(),
            )
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new(SimOptions::default())
    }
}

impl Circuit {
    pub fn new(options: SimOptions) -> Self {
        Self {
            nodes: NodeTable::new(),
            models: Vec::new(),
            matrix: MatrixStore::new(0),
            states: StateStore::new(),
            options,
            solution: Vec::new(),
            dirty: true,
        }
    }

    pub fn options(&self) -> &SimOptions {
        &self.options
    }

    /// Replace the options; forces a new setup.
    pub fn set_options(&mut self, options: SimOptions) {
        self.options = options;
        self.dirty = true;
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    /// Get or create a netlist node.
    pub fn node(&mut self, name: &str) -> NodeId {
        let before = self.nodes.num_netlist_nodes();
        let id = self.nodes.node(name);
        if self.nodes.num_netlist_nodes() != before {
            self.dirty = true;
        }
        id
    }

    /// Add a model of the given device type.
    pub fn add_model(
        &mut self,
        kind: Rc<dyn DeviceKind>,
        name: &str,
        params: &ParamList,
    ) -> Result<usize> {
        if self.find_model(name).is_some() {
            return Err(CoreError::InvalidCircuit(format!("duplicate model {}", name)).into());
        }
        let model = kind.new_model(name, params)?;
        self.models.push(ModelEntry { kind, model });
        self.dirty = true;
        Ok(self.models.len() - 1)
    }

    /// Add a model of a device type looked up by name in `registry`.
    pub fn add_model_from(
        &mut self,
        registry: &DeviceRegistry,
        device: &str,
        name: &str,
        params: &ParamList,
    ) -> Result<usize> {
        let kind = registry
            .by_name(device)
            .ok_or_else(|| Error::UnknownDevice(device.to_string()))?;
        self.add_model(kind, name, params)
    }

    /// Add an instance of `model` connected to the named nodes.
    pub fn add_instance(
        &mut self,
        model: &str,
        name: &str,
        terminals: &[&str],
        params: &ParamList,
    ) -> Result<()> {
        let index = self.model_index(model)?;
        let nodes: Vec<NodeId> = terminals.iter().map(|t| self.node(t)).collect();
        self.models[index].model.add_instance(name, &nodes, params)?;
        self.dirty = true;
        Ok(())
    }

    pub fn delete_instance(&mut self, model: &str, name: &str) -> Result<()> {
        let index = self.model_index(model)?;
        self.models[index].model.delete_instance(name)?;
        self.dirty = true;
        Ok(())
    }

    /// Remove a model and all its instances.
    pub fn delete_model(&mut self, model: &str) -> Result<()> {
        let index = self.model_index(model)?;
        self.models.remove(index);
        self.dirty = true;
        Ok(())
    }

    /// Change a model (`instance == None`) or instance parameter.
    pub fn set_param(
        &mut self,
        model: &str,
        instance: Option<&str>,
        name: &str,
        value: &ParamValue,
    ) -> Result<()> {
        let index = self.model_index(model)?;
        self.models[index].model.set_param(instance, name, value)?;
        self.dirty = true;
        Ok(())
    }

    fn find_model(&self, name: &str) -> Option<usize> {
        self.models
            .iter()
            .position(|m| m.model.name().eq_ignore_ascii_case(name))
    }

    fn model_index(&self, name: &str) -> Result<usize> {
        self.find_model(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    pub fn model(&self, name: &str) -> Option<&dyn DeviceModel> {
        self.find_model(name).map(|i| self.models[i].model.as_ref())
    }

    /// Model names in registration order.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|m| m.model.name())
    }

    /// Names of the models created from the named device type.
    pub fn models_of_device(&self, device: &str) -> Vec<String> {
        self.models
            .iter()
            .filter(|m| m.kind.info().name.eq_ignore_ascii_case(device))
            .map(|m| m.model.name().to_string())
            .collect()
    }

    /// Remove every model created from the named device type.
    ///
    /// Returns the removed model names.
    pub fn detach_device(&mut self, device: &str) -> Vec<String> {
        let removed = self.models_of_device(device);
        if !removed.is_empty() {
            self.models
                .retain(|m| !m.kind.info().name.eq_ignore_ascii_case(device));
            self.dirty = true;
            log::info!("detached models {:?} of device {}", removed, device);
        }
        removed
    }

    /// `model/instance` for a reference recorded by the convergence checker.
    pub fn describe(&self, r: InstanceRef) -> Option<String> {
        let entry = self.models.get(r.model)?;
        let instance = entry.model.instance_name(r.instance)?;
        Some(format!("{}/{}", entry.model.name(), instance))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of matrix unknowns after the last setup.
    pub fn size(&self) -> usize {
        self.matrix.size()
    }

    pub fn matrix(&self) -> &MatrixStore {
        &self.matrix
    }

    pub fn states(&self) -> &StateStore {
        &self.states
    }

    /// Latest solution, indexed by matrix row.
    pub fn solution(&self) -> &[f64] {
        &self.solution
    }

    /// Value of a node in the latest solution.
    pub fn voltage(&self, name: &str) -> Result<f64> {
        let id = self.nodes.find(name)?;
        Ok(nodal_core::context::voltage_at(&self.solution, id))
    }

    /// Resolve nodes, handles and states, then apply temperatures.
    ///
    /// A `BadParameter` from any model is reported as a fatal diagnostic
    /// naming the model and instance, and aborts setup.
    pub fn setup(&mut self, diag: &mut dyn DiagnosticSink) -> Result<()> {
        self.options.validate()?;
        self.nodes.clear_device_nodes();
        self.matrix.reset(0);
        self.states.reset();

        for entry in &mut self.models {
            let mut ctx = SetupContext {
                nodes: &mut self.nodes,
                matrix: &mut self.matrix,
                states: &mut self.states,
                options: &self.options,
                diag: &mut *diag,
            };
            entry
                .model
                .setup(&mut ctx)
                .map_err(|e| report_fatal(e, &mut *diag))?;
        }

        let size = self.nodes.num_unknowns();
        self.matrix.set_size(size);
        self.solution.resize(size, 0.0);
        log::debug!(
            "setup: {} unknowns, {} matrix entries, {} state slots",
            size,
            self.matrix.nnz(),
            self.states.width()
        );

        self.temperature_update(diag)?;
        self.dirty = false;
        Ok(())
    }

    /// Re-run temperature-dependent precomputation for every model.
    pub fn temperature_update(&mut self, diag: &mut dyn DiagnosticSink) -> Result<()> {
        for entry in &mut self.models {
            let mut ctx = TempContext {
                options: &self.options,
                diag: &mut *diag,
            };
            entry
                .model
                .temperature_update(&mut ctx)
                .map_err(|e| report_fatal(e, &mut *diag))?;
        }
        Ok(())
    }

    /// Run setup if anything changed since the last one.
    pub fn ensure_ready(&mut self, diag: &mut dyn DiagnosticSink) -> Result<()> {
        if self.dirty {
            self.setup(diag)?;
        }
        Ok(())
    }

    /// Clear the matrix and let every model stamp at `solution`.
    pub(crate) fn load(
        &mut self,
        mode: Mode,
        integrator: &Integrator,
        conv: &mut ConvergenceChecker,
        time: f64,
        diag: &mut dyn DiagnosticSink,
    ) -> Result<LoadPass> {
        self.matrix.clear();
        let mut pass = LoadPass::default();
        for (index, entry) in self.models.iter_mut().enumerate() {
            conv.enter(index);
            let mut ctx = LoadContext::new(
                mode,
                &self.options,
                &self.solution,
                &mut self.matrix,
                &mut self.states,
                integrator,
                conv,
                time,
                &mut *diag,
            );
            let status = entry.model.load(&mut ctx)?;
            pass.bypassed += ctx.bypassed();
            pass.status = pass.status.merge(status);
        }
        Ok(pass)
    }

    /// Let every model test its currents against `solution`.
    pub(crate) fn convergence_test(&self, mode: Mode, conv: &mut ConvergenceChecker) {
        for (index, entry) in self.models.iter().enumerate() {
            conv.enter(index);
            let mut ctx = ConvTestContext {
                mode,
                options: &self.options,
                solution: &self.solution,
                states: &self.states,
                conv,
            };
            entry.model.convergence_test(&mut ctx);
        }
    }

    /// Smallest step any model's charges allow, at most `step`.
    pub(crate) fn truncation(&self, integrator: &Integrator, step: f64) -> f64 {
        let ctx = TruncContext {
            options: &self.options,
            states: &self.states,
            integrator,
        };
        self.models
            .iter()
            .fold(step, |h, entry| entry.model.truncation_error(&ctx, h))
    }

    /// Clear the matrix and stamp the small-signal system at `omega`.
    pub(crate) fn ac_load(&mut self, omega: f64) -> Result<()> {
        self.matrix.clear();
        for entry in &self.models {
            let mut ctx = AcLoadContext {
                omega,
                options: &self.options,
                matrix: &mut self.matrix,
                states: &self.states,
            };
            entry.model.ac_load(&mut ctx)?;
        }
        Ok(())
    }

    /// Clear the matrix and stamp `G + sC`.
    pub(crate) fn pz_load(&mut self, s: Complex64) -> Result<()> {
        self.matrix.clear();
        for entry in &self.models {
            let mut ctx = PzLoadContext {
                s,
                options: &self.options,
                matrix: &mut self.matrix,
                states: &self.states,
            };
            entry.model.pz_load(&mut ctx)?;
        }
        Ok(())
    }

    /// Zero the solution, then apply the user's node voltages.
    pub(crate) fn seed_solution(&mut self, ic: &InitialConditions) {
        self.solution.fill(0.0);
        ic.apply(&mut self.solution, &self.nodes);
    }

    /// Let instances without an initial condition take one from the solution.
    pub(crate) fn initial_conditions(&mut self) {
        for entry in &mut self.models {
            entry.model.initial_conditions(&self.solution);
        }
    }
}

fn report_fatal(err: CoreError, diag: &mut dyn DiagnosticSink) -> Error {
    if let CoreError::BadParameter {
        model,
        instance,
        reason,
    } = &err
    {
        let origin = if instance == "*" {
            Origin::model(model.as_str())
        } else {
            Origin::instance(model.as_str(), instance.as_str())
        };
        diag.emit(Diagnostic::fatal(origin, reason.as_str()));
    }
    err.into()
}
