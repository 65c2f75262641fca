//! Linear capacitor.

use nodal_core::{
    AcLoadContext, Error, InitPhase, LoadContext, MatrixHandle, NodeId, ParamList, ParamValue,
    PzLoadContext, Result, SetupContext, StateBlock, StateSlot, TruncContext, context::voltage_at,
};

use crate::device::{DeviceInfo, DeviceKind, DeviceModel, Instances, LoadStatus, check_terminals};

const MODEL_PARAMS: &[&str] = &["cj", "defw"];
const INSTANCE_PARAMS: &[&str] = &["c", "l", "w", "m", "ic"];

#[derive(Clone, Copy)]
enum Slot {
    Charge,
    Current,
}

impl StateSlot for Slot {
    const COUNT: usize = 2;
    fn offset(self) -> usize {
        self as usize
    }
}

/// Device type for `C` elements.
pub struct CapacitorKind {
    info: DeviceInfo,
}

impl Default for CapacitorKind {
    fn default() -> Self {
        Self {
            info: DeviceInfo::new("capacitor", 'C', 1, 2, "Linear capacitor"),
        }
    }
}

impl DeviceKind for CapacitorKind {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn new_model(&self, name: &str, params: &ParamList) -> Result<Box<dyn DeviceModel>> {
        params.check_known(MODEL_PARAMS)?;
        Ok(Box::new(CapacitorModel {
            name: name.to_string(),
            cj: params.real("cj")?,
            defw: params.real_or("defw", 1e-6)?,
            instances: Instances::new(),
        }))
    }
}

#[derive(Debug, Clone)]
struct Capacitor {
    pos: NodeId,
    neg: NodeId,
    capacitance: Option<f64>,
    length: Option<f64>,
    width: Option<f64>,
    multiplier: f64,
    ic: Option<f64>,
    handles: [MatrixHandle; 4],
    states: StateBlock,
    cap: f64,
}

#[derive(Debug)]
pub struct CapacitorModel {
    name: String,
    cj: Option<f64>,
    defw: f64,
    instances: Instances<Capacitor>,
}

impl CapacitorModel {
    fn capacitance(&self, name: &str, c: &Capacitor) -> Result<f64> {
        let value = match (c.capacitance, self.cj, c.length) {
            (Some(v), _, _) => v,
            (None, Some(cj), Some(l)) => cj * l * c.width.unwrap_or(self.defw),
            _ => {
                return Err(Error::bad_parameter(
                    &self.name,
                    name,
                    "no capacitance value or geometry given",
                ));
            }
        };
        if value < 0.0 {
            return Err(Error::bad_parameter(
                &self.name,
                name,
                format!("negative capacitance {}", value),
            ));
        }
        Ok(value * c.multiplier)
    }
}

impl DeviceModel for CapacitorModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &str {
        "capacitor"
    }

    fn add_instance(&mut self, name: &str, nodes: &[NodeId], params: &ParamList) -> Result<usize> {
        check_terminals("capacitor", name, nodes, 2)?;
        params.check_known(INSTANCE_PARAMS)?;
        let inst = Capacitor {
            pos: nodes[0],
            neg: nodes[1],
            capacitance: params.real("c")?,
            length: params.real("l")?,
            width: params.real("w")?,
            multiplier: params.real_or("m", 1.0)?,
            ic: params.real("ic")?,
            handles: [MatrixHandle::GROUND; 4],
            states: StateBlock::default(),
            cap: 0.0,
        };
        self.instances.push(name, inst)
    }

    fn delete_instance(&mut self, name: &str) -> Result<()> {
        self.instances.remove(name).map(|_| ())
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn instance_name(&self, index: usize) -> Option<&str> {
        self.instances.name(index)
    }

    fn set_param(&mut self, instance: Option<&str>, name: &str, value: &ParamValue) -> Result<()> {
        match instance {
            None => match name.to_ascii_lowercase().as_str() {
                "cj" => self.cj = Some(value.expect_real(name)?),
                "defw" => self.defw = value.expect_real(name)?,
                _ => return Err(Error::UnknownParameter(name.to_string())),
            },
            Some(inst) => {
                let c = self.instances.get_mut(inst)?;
                match name.to_ascii_lowercase().as_str() {
                    "c" => c.capacitance = Some(value.expect_real(name)?),
                    "l" => c.length = Some(value.expect_real(name)?),
                    "w" => c.width = Some(value.expect_real(name)?),
                    "m" => c.multiplier = value.expect_real(name)?,
                    "ic" => c.ic = Some(value.expect_real(name)?),
                    _ => return Err(Error::UnknownParameter(name.to_string())),
                }
            }
        }
        Ok(())
    }

    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        let mut caps = Vec::with_capacity(self.instances.len());
        for (_, name, c) in self.instances.iter() {
            caps.push(self.capacitance(name, c)?);
        }
        for ((_, _, c), cap) in self.instances.iter_mut().zip(caps) {
            c.handles = ctx.entries2(c.pos, c.neg);
            c.states = ctx.allocate_states(Slot::COUNT);
            c.cap = cap;
        }
        Ok(())
    }

    fn initial_conditions(&mut self, solution: &[f64]) {
        for (_, _, c) in self.instances.iter_mut() {
            if c.ic.is_none() {
                c.ic = Some(voltage_at(solution, c.pos) - voltage_at(solution, c.neg));
            }
        }
    }

    fn load(&mut self, ctx: &mut LoadContext) -> Result<LoadStatus> {
        let first_step = ctx.mode.phase == InitPhase::Transient;
        for (_, _, c) in self.instances.iter() {
            let vcap = match c.ic {
                Some(ic) if ctx.mode.use_ic && first_step => ic,
                _ => ctx.voltage_between(c.pos, c.neg),
            };
            let q = c.states.at(Slot::Charge);
            ctx.states.set(0, q, c.cap * vcap);
            if !ctx.mode.is_transient() {
                continue;
            }
            if first_step {
                ctx.states.set(1, q, ctx.states.get(0, q));
            }
            let (geq, ceq) = ctx.integrator.integrate(ctx.states, q, c.cap);
            if first_step {
                let i = c.states.at(Slot::Current);
                ctx.states.set(1, i, ctx.states.get(0, i));
            }
            ctx.stamp_conductance(&c.handles, geq);
            ctx.stamp_current(c.pos, c.neg, ceq);
        }
        Ok(LoadStatus::Continue)
    }

    fn ac_load(&self, ctx: &mut AcLoadContext) -> Result<()> {
        for (_, _, c) in self.instances.iter() {
            let b = ctx.omega * c.cap;
            ctx.stamp_admittance(&c.handles, 0.0, b);
        }
        Ok(())
    }

    fn pz_load(&self, ctx: &mut PzLoadContext) -> Result<()> {
        for (_, _, c) in self.instances.iter() {
            ctx.stamp_gc(&c.handles, 0.0, c.cap);
        }
        Ok(())
    }

    fn truncation_error(&self, ctx: &TruncContext, step: f64) -> f64 {
        self.instances
            .iter()
            .fold(step, |h, (_, _, c)| ctx.limit(c.states.at(Slot::Charge), h))
    }
}
