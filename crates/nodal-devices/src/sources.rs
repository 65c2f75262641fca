//! Independent voltage and current sources.

use nodal_core::{
    AcLoadContext, Error, LoadContext, MatrixHandle, NodeId, ParamList, ParamValue,
    PzLoadContext, Result, SetupContext,
};
use num_complex::Complex64;

use crate::device::{DeviceInfo, DeviceKind, DeviceModel, Instances, LoadStatus, check_terminals};
use crate::waveform::Waveform;

const SOURCE_PARAMS: &[&str] = &["dc", "pulse", "sin", "pwl", "ac", "acphase"];

#[derive(Debug, Clone)]
struct Source {
    pos: NodeId,
    neg: NodeId,
    waveform: Waveform,
    ac: Complex64,
    params: ParamList,
}

impl Source {
    fn new(nodes: &[NodeId], params: &ParamList) -> Result<Self> {
        params.check_known(SOURCE_PARAMS)?;
        let mag = params.real_or("ac", 0.0)?;
        let phase = params.real_or("acphase", 0.0)?.to_radians();
        Ok(Self {
            pos: nodes[0],
            neg: nodes[1],
            waveform: Waveform::from_params(params)?,
            ac: Complex64::from_polar(mag, phase),
            params: params.clone(),
        })
    }

    fn set(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        let key = name.to_ascii_lowercase();
        if !SOURCE_PARAMS.contains(&key.as_str()) {
            return Err(Error::UnknownParameter(name.to_string()));
        }
        let mut params = self.params.clone();
        // a new time function replaces the old one
        if matches!(key.as_str(), "pulse" | "sin" | "pwl" | "dc") {
            params = params
                .iter()
                .filter(|(k, _)| !matches!(*k, "pulse" | "sin" | "pwl"))
                .fold(ParamList::new(), |acc, (k, v)| acc.with(k, v.clone()));
        }
        params.set(&key, value.clone());
        let nodes = [self.pos, self.neg];
        *self = Source::new(&nodes, &params)?;
        Ok(())
    }

    /// Value at the point being solved; the operating point uses `t = 0`.
    fn value(&self, ctx: &LoadContext) -> f64 {
        if ctx.mode.is_transient() {
            self.waveform.value_at(ctx.time)
        } else {
            self.waveform.dc_value()
        }
    }
}

/// Device type for `V` elements.
pub struct VoltageSourceKind {
    info: DeviceInfo,
}

impl Default for VoltageSourceKind {
    fn default() -> Self {
        Self {
            info: DeviceInfo::new("vsource", 'V', 1, 2, "Independent voltage source"),
        }
    }
}

impl DeviceKind for VoltageSourceKind {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn new_model(&self, name: &str, params: &ParamList) -> Result<Box<dyn DeviceModel>> {
        params.check_known(&[])?;
        Ok(Box::new(VoltageSourceModel {
            name: name.to_string(),
            instances: Instances::new(),
        }))
    }
}

#[derive(Debug, Clone)]
struct VoltageSource {
    source: Source,
    branch: NodeId,
    /// `[pos-branch, neg-branch, branch-pos, branch-neg]`
    handles: [MatrixHandle; 4],
}

impl VoltageSource {
    fn stamp_incidence(&self, matrix: &mut nodal_core::MatrixStore) {
        matrix.add(self.handles[0], 1.0);
        matrix.add(self.handles[1], -1.0);
        matrix.add(self.handles[2], 1.0);
        matrix.add(self.handles[3], -1.0);
    }
}

#[derive(Debug)]
pub struct VoltageSourceModel {
    name: String,
    instances: Instances<VoltageSource>,
}

impl DeviceModel for VoltageSourceModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &str {
        "vsource"
    }

    fn add_instance(&mut self, name: &str, nodes: &[NodeId], params: &ParamList) -> Result<usize> {
        check_terminals("vsource", name, nodes, 2)?;
        let inst = VoltageSource {
            source: Source::new(nodes, params)?,
            branch: NodeId::GROUND,
            handles: [MatrixHandle::GROUND; 4],
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
        let Some(inst) = instance else {
            return Err(Error::UnknownParameter(name.to_string()));
        };
        self.instances.get_mut(inst)?.source.set(name, value)
    }

    fn setup(&mut self, ctx: &mut SetupContext) -> Result<()> {
        for (_, name, v) in self.instances.iter_mut() {
            v.branch = ctx.branch(name)?;
            let (p, n, b) = (v.source.pos, v.source.neg, v.branch);
            v.handles = [ctx.entry(p, b), ctx.entry(n, b), ctx.entry(b, p), ctx.entry(b, n)];
        }
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext) -> Result<LoadStatus> {
        for (_, _, v) in self.instances.iter() {
            v.stamp_incidence(ctx.matrix);
            let value = v.source.value(ctx);
            ctx.matrix.add_rhs(v.branch, value);
        }
        Ok(LoadStatus::Continue)
    }

    fn ac_load(&self, ctx: &mut AcLoadContext) -> Result<()> {
        for (_, _, v) in self.instances.iter() {
            v.stamp_incidence(ctx.matrix);
            ctx.matrix
                .add_rhs_complex(v.branch, v.source.ac.re, v.source.ac.im);
        }
        Ok(())
    }

    fn pz_load(&self, ctx: &mut PzLoadContext) -> Result<()> {
        // a zeroed voltage source is a short
        for (_, _, v) in self.instances.iter() {
            v.stamp_incidence(ctx.matrix);
        }
        Ok(())
    }
}

/// Device type for `I` elements.
pub struct CurrentSourceKind {
    info: DeviceInfo,
}

impl Default for CurrentSourceKind {
    fn default() -> Self {
        Self {
            info: DeviceInfo::new("isource", 'I', 1, 2, "Independent current source"),
        }
    }
}

impl DeviceKind for CurrentSourceKind {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn new_model(&self, name: &str, params: &ParamList) -> Result<Box<dyn DeviceModel>> {
        params.check_known(&[])?;
        Ok(Box::new(CurrentSourceModel {
            name: name.to_string(),
            instances: Instances::new(),
        }))
    }
}

/// Current flows from the positive node through the source to the negative node.
#[derive(Debug)]
pub struct CurrentSourceModel {
    name: String,
    instances: Instances<Source>,
}

impl DeviceModel for CurrentSourceModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &str {
        "isource"
    }

    fn add_instance(&mut self, name: &str, nodes: &[NodeId], params: &ParamList) -> Result<usize> {
        check_terminals("isource", name, nodes, 2)?;
        self.instances.push(name, Source::new(nodes, params)?)
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
        let Some(inst) = instance else {
            return Err(Error::UnknownParameter(name.to_string()));
        };
        self.instances.get_mut(inst)?.set(name, value)
    }

    fn setup(&mut self, _ctx: &mut SetupContext) -> Result<()> {
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext) -> Result<LoadStatus> {
        for (_, _, s) in self.instances.iter() {
            let value = s.value(ctx);
            ctx.stamp_current(s.pos, s.neg, value);
        }
        Ok(LoadStatus::Continue)
    }

    fn ac_load(&self, ctx: &mut AcLoadContext) -> Result<()> {
        for (_, _, s) in self.instances.iter() {
            ctx.matrix.add_rhs_complex(s.pos, -s.ac.re, -s.ac.im);
            ctx.matrix.add_rhs_complex(s.neg, s.ac.re, s.ac.im);
        }
        Ok(())
    }

    fn pz_load(&self, _ctx: &mut PzLoadContext) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_param_replaces_time_function() {
        let nodes = [NodeId::new(1), NodeId::GROUND];
        let mut s = Source::new(&nodes, &ParamList::new().with("sin", vec![0.0, 1.0, 1e3]))
            .unwrap();
        s.set("dc", &ParamValue::Real(2.5)).unwrap();
        assert_eq!(s.waveform, Waveform::Dc(2.5));
        assert!(s.set("bogus", &ParamValue::Real(1.0)).is_err());
    }

    #[test]
    fn test_ac_phasor() {
        let nodes = [NodeId::new(1), NodeId::GROUND];
        let s = Source::new(
            &nodes,
            &ParamList::new().with("ac", 2.0).with("acphase", 90.0),
        )
        .unwrap();
        assert!(s.ac.re.abs() < 1e-12);
        assert!((s.ac.im - 2.0).abs() < 1e-12);
    }
}
