//! Linear resistor.

use nodal_core::{
    AcLoadContext, Error, LoadContext, MatrixHandle, NodeId, ParamList, ParamValue,
    PzLoadContext, Result, SetupContext, TempContext,
};

use crate::device::{DeviceInfo, DeviceKind, DeviceModel, Instances, LoadStatus, check_terminals};

const MODEL_PARAMS: &[&str] = &["rsh", "tc1", "tc2", "tnom", "defw"];
const INSTANCE_PARAMS: &[&str] = &["r", "l", "w", "m", "tc1", "tc2"];

/// Device type for `R` elements.
pub struct ResistorKind {
    info: DeviceInfo,
}

impl Default for ResistorKind {
    fn default() -> Self {
        Self {
            info: DeviceInfo::new("resistor", 'R', 1, 2, "Linear resistor"),
        }
    }
}

impl DeviceKind for ResistorKind {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn new_model(&self, name: &str, params: &ParamList) -> Result<Box<dyn DeviceModel>> {
        params.check_known(MODEL_PARAMS)?;
        Ok(Box::new(ResistorModel {
            name: name.to_string(),
            rsh: params.real("rsh")?,
            tc1: params.real_or("tc1", 0.0)?,
            tc2: params.real_or("tc2", 0.0)?,
            tnom: params.real("tnom")?,
            defw: params.real_or("defw", 1e-6)?,
            instances: Instances::new(),
        }))
    }
}

#[derive(Debug, Clone)]
struct Resistor {
    pos: NodeId,
    neg: NodeId,
    resistance: Option<f64>,
    length: Option<f64>,
    width: Option<f64>,
    multiplier: f64,
    tc1: Option<f64>,
    tc2: Option<f64>,
    handles: [MatrixHandle; 4],
    conductance: f64,
}

/// Model card shared by resistors.
#[derive(Debug)]
pub struct ResistorModel {
    name: String,
    rsh: Option<f64>,
    tc1: f64,
    tc2: f64,
    tnom: Option<f64>,
    defw: f64,
    instances: Instances<Resistor>,
}

impl ResistorModel {
    fn nominal_resistance(&self, inst: &Resistor) -> Option<f64> {
        match (inst.resistance, self.rsh, inst.length) {
            (Some(r), _, _) => Some(r),
            (None, Some(rsh), Some(l)) => Some(rsh * l / inst.width.unwrap_or(self.defw)),
            _ => None,
        }
    }

    /// Conductance of an instance after the last temperature update.
    pub fn conductance(&self, instance: &str) -> Option<f64> {
        self.instances
            .iter()
            .find(|(_, n, _)| n.eq_ignore_ascii_case(instance))
            .map(|(_, _, r)| r.conductance)
    }
}

impl DeviceModel for ResistorModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &str {
        "resistor"
    }

    fn add_instance(&mut self, name: &str, nodes: &[NodeId], params: &ParamList) -> Result<usize> {
        check_terminals("resistor", name, nodes, 2)?;
        params.check_known(INSTANCE_PARAMS)?;
        let inst = Resistor {
            pos: nodes[0],
            neg: nodes[1],
            resistance: params.real("r")?,
            length: params.real("l")?,
            width: params.real("w")?,
            multiplier: params.real_or("m", 1.0)?,
            tc1: params.real("tc1")?,
            tc2: params.real("tc2")?,
            handles: [MatrixHandle::GROUND; 4],
            conductance: 0.0,
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
                "rsh" => self.rsh = Some(value.expect_real(name)?),
                "tc1" => self.tc1 = value.expect_real(name)?,
                "tc2" => self.tc2 = value.expect_real(name)?,
                "tnom" => self.tnom = Some(value.expect_real(name)?),
                "defw" => self.defw = value.expect_real(name)?,
                _ => return Err(Error::UnknownParameter(name.to_string())),
            },
            Some(inst) => {
                let r = self.instances.get_mut(inst)?;
                match name.to_ascii_lowercase().as_str() {
                    "r" => r.resistance = Some(value.expect_real(name)?),
                    "l" => r.length = Some(value.expect_real(name)?),
                    "w" => r.width = Some(value.expect_real(name)?),
                    "m" => r.multiplier = value.expect_real(name)?,
                    "tc1" => r.tc1 = Some(value.expect_real(name)?),
                    "tc2" => r.tc2 = Some(value.expect_real(name)?),
                    _ => return Err(Error::UnknownParameter(name.to_string())),
                }
            }
        }
        Ok(())
    }

    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        for (_, _, r) in self.instances.iter_mut() {
            r.handles = ctx.entries2(r.pos, r.neg);
        }
        Ok(())
    }

    fn temperature_update(&mut self, ctx: &mut TempContext) -> Result<()> {
        let tnom = self.tnom.unwrap_or(ctx.options.nominal_temperature);
        let dt = ctx.options.temperature - tnom;
        let mut updates = Vec::with_capacity(self.instances.len());
        for (_, name, r) in self.instances.iter() {
            let Some(nominal) = self.nominal_resistance(r) else {
                return Err(Error::bad_parameter(
                    &self.name,
                    name,
                    "no resistance value or geometry given",
                ));
            };
            let tc1 = r.tc1.unwrap_or(self.tc1);
            let tc2 = r.tc2.unwrap_or(self.tc2);
            let resistance = nominal * (1.0 + tc1 * dt + tc2 * dt * dt);
            if !(resistance > 0.0) || !(r.multiplier > 0.0) {
                return Err(Error::bad_parameter(
                    &self.name,
                    name,
                    format!("resistance must be positive, got {}", resistance),
                ));
            }
            updates.push(r.multiplier / resistance);
        }
        for ((_, _, r), g) in self.instances.iter_mut().zip(updates) {
            r.conductance = g;
        }
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext) -> Result<LoadStatus> {
        for (_, _, r) in self.instances.iter() {
            ctx.stamp_conductance(&r.handles, r.conductance);
        }
        Ok(LoadStatus::Continue)
    }

    fn ac_load(&self, ctx: &mut AcLoadContext) -> Result<()> {
        for (_, _, r) in self.instances.iter() {
            ctx.stamp_admittance(&r.handles, r.conductance, 0.0);
        }
        Ok(())
    }

    fn pz_load(&self, ctx: &mut PzLoadContext) -> Result<()> {
        for (_, _, r) in self.instances.iter() {
            ctx.stamp_gc(&r.handles, r.conductance, 0.0);
        }
        Ok(())
    }
}
