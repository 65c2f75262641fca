//! The operation set every device model exposes to the engine.
//!
//! A [`DeviceKind`] describes one device type (resistor, diode, a MOSFET
//! level) and creates models from model cards. A [`DeviceModel`] owns its
//! instances and is driven through the phases of an analysis:
//!
//! 1. `setup` once per topology change: resolve nodes, create internal
//!    unknowns, request matrix handles and state slots
//! 2. `temperature_update` after setup or any parameter change
//! 3. `load` every Newton iteration, `convergence_test` after every solve
//! 4. `truncation_error` after every accepted time point
//! 5. `ac_load` / `pz_load` for small-signal analyses

use nodal_core::{
    AcLoadContext, ConvTestContext, Error, LoadContext, NodeId, ParamList, ParamValue,
    PzLoadContext, Result, SetupContext, TempContext, TruncContext,
};

/// Static description of a device type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Unique device name, e.g. `"diode"`.
    pub name: String,
    /// Netlist key letter, e.g. `'D'`.
    pub key: char,
    /// Model level distinguishing devices sharing a key.
    pub level: u32,
    /// Number of external terminals.
    pub terminals: usize,
    pub description: String,
}

impl DeviceInfo {
    pub fn new(name: &str, key: char, level: u32, terminals: usize, description: &str) -> Self {
        Self {
            name: name.to_string(),
            key: key.to_ascii_uppercase(),
            level,
            terminals,
            description: description.to_string(),
        }
    }

    /// True if both describe the same netlist key and level.
    pub fn same_slot(&self, other: &DeviceInfo) -> bool {
        self.key == other.key && self.level == other.level
    }
}

/// Result of a device `load`, checked by the driver after every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStatus {
    #[default]
    Continue,
    /// Terminate the analysis and report.
    Finish,
    /// Suspend the analysis; it may be resumed.
    Pause,
}

impl LoadStatus {
    /// Keep the most urgent of two statuses.
    pub fn merge(self, other: LoadStatus) -> LoadStatus {
        match (self, other) {
            (LoadStatus::Finish, _) | (_, LoadStatus::Finish) => LoadStatus::Finish,
            (LoadStatus::Pause, _) | (_, LoadStatus::Pause) => LoadStatus::Pause,
            _ => LoadStatus::Continue,
        }
    }
}

/// A device type able to create models.
pub trait DeviceKind {
    fn info(&self) -> &DeviceInfo;

    /// Create a model from a model card.
    fn new_model(&self, name: &str, params: &ParamList) -> Result<Box<dyn DeviceModel>>;
}

/// One model card and the instances that use it.
pub trait DeviceModel {
    /// Model name.
    fn name(&self) -> &str;

    /// Name of the device type that created this model.
    fn device(&self) -> &str;

    /// Add an instance connected to `nodes`; returns its index in the model.
    fn add_instance(&mut self, name: &str, nodes: &[NodeId], params: &ParamList)
    -> Result<usize>;

    /// Remove an instance by name.
    fn delete_instance(&mut self, name: &str) -> Result<()>;

    fn instance_count(&self) -> usize;

    fn instance_name(&self, index: usize) -> Option<&str>;

    /// Change a model parameter (`instance == None`) or an instance parameter.
    fn set_param(&mut self, instance: Option<&str>, name: &str, value: &ParamValue) -> Result<()>;

    /// Resolve nodes, matrix handles and state slots.
    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()>;

    /// Recompute temperature- and geometry-dependent values.
    fn temperature_update(&mut self, _ctx: &mut TempContext) -> Result<()> {
        Ok(())
    }

    /// Record initial conditions from a solution vector for instances lacking one.
    fn initial_conditions(&mut self, _solution: &[f64]) {}

    /// Stamp the linearized device at the current iterate.
    fn load(&mut self, ctx: &mut LoadContext) -> Result<LoadStatus>;

    /// Stamp the small-signal admittance at the operating point.
    fn ac_load(&self, ctx: &mut AcLoadContext) -> Result<()>;

    /// Stamp `G + sC` at the operating point.
    fn pz_load(&self, ctx: &mut PzLoadContext) -> Result<()>;

    /// Compare predicted and computed currents after a solve.
    fn convergence_test(&self, _ctx: &mut ConvTestContext) {}

    /// Largest step the charges of this model allow, at most `step`.
    fn truncation_error(&self, _ctx: &TruncContext, step: f64) -> f64 {
        step
    }
}

/// Ordered instances of one model.
#[derive(Debug, Clone)]
pub struct Instances<T> {
    items: Vec<(String, T)>,
}

impl<T> Default for Instances<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> Instances<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instance, rejecting duplicate names.
    pub fn push(&mut self, name: &str, item: T) -> Result<usize> {
        if self.position(name).is_some() {
            return Err(Error::InvalidCircuit(format!("duplicate instance {}", name)));
        }
        self.items.push((name.to_string(), item));
        Ok(self.items.len() - 1)
    }

    /// Remove an instance, keeping the order of the rest.
    pub fn remove(&mut self, name: &str) -> Result<T> {
        let pos = self
            .position(name)
            .ok_or_else(|| Error::InvalidCircuit(format!("no instance {}", name)))?;
        Ok(self.items.remove(pos).1)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut T> {
        let pos = self
            .position(name)
            .ok_or_else(|| Error::InvalidCircuit(format!("no instance {}", name)))?;
        Ok(&mut self.items[pos].1)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(|(n, _)| n.as_str())
    }

    /// `(index, name, instance)` in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, (n, t))| (i, n.as_str(), t))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &str, &mut T)> {
        self.items
            .iter_mut()
            .enumerate()
            .map(|(i, (n, t))| (i, n.as_str(), t))
    }
}

/// Fail unless exactly `expected` terminals were given.
pub fn check_terminals(device: &str, instance: &str, nodes: &[NodeId], expected: usize) -> Result<()> {
    if nodes.len() != expected {
        return Err(Error::InvalidCircuit(format!(
            "{} {} needs {} terminals, got {}",
            device,
            instance,
            expected,
            nodes.len()
        )));
    }
    Ok(())
}
