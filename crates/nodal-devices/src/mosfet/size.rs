//! Size-dependent parameters, shared between instances of equal geometry.

use std::rc::Rc;

use indexmap::IndexMap;
use nodal_core::{Error, Result};

use super::params::MosParams;

/// Coefficients that depend only on the drawn channel length and width.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeParams {
    /// Effective channel length (m).
    pub leff: f64,
    /// Effective channel width (m).
    pub weff: f64,
    /// `kp·weff/leff` at the nominal temperature (A/V²).
    pub beta: f64,
    /// Total gate oxide capacitance `cox·weff·leff` (F).
    pub oxide_cap: f64,
    /// Gate-source overlap capacitance (F).
    pub gs_overlap: f64,
    pub gd_overlap: f64,
    pub gb_overlap: f64,
}

impl SizeParams {
    fn derive(p: &MosParams, model: &str, instance: &str, l: f64, w: f64) -> Result<Self> {
        let leff = l - 2.0 * p.ld;
        if !(leff > 0.0) {
            return Err(Error::bad_parameter(
                model,
                instance,
                format!("effective channel length {} m is not positive", leff),
            ));
        }
        if !(w > 0.0) {
            return Err(Error::bad_parameter(
                model,
                instance,
                format!("channel width {} m is not positive", w),
            ));
        }
        let cox = p.cox();
        let kp = p.kp.unwrap_or(p.uo * 1e-4 * cox);
        Ok(Self {
            leff,
            weff: w,
            beta: kp * w / leff,
            oxide_cap: cox * w * leff,
            gs_overlap: p.cgso * w,
            gd_overlap: p.cgdo * w,
            gb_overlap: p.cgbo * leff,
        })
    }
}

/// Per-model cache of [`SizeParams`] keyed by the exact `(L, W)` bit patterns.
#[derive(Debug, Default)]
pub struct SizeCache {
    blocks: IndexMap<(u64, u64), Rc<SizeParams>>,
}

impl SizeCache {
    /// Block for `(l, w)`, derived on first use.
    pub fn get_or_derive(
        &mut self,
        p: &MosParams,
        model: &str,
        instance: &str,
        l: f64,
        w: f64,
    ) -> Result<Rc<SizeParams>> {
        let key = (l.to_bits(), w.to_bits());
        if let Some(block) = self.blocks.get(&key) {
            return Ok(Rc::clone(block));
        }
        let block = Rc::new(SizeParams::derive(p, model, instance, l, w)?);
        log::debug!(
            "{}: new size block L={} W={} (beta={:.3e})",
            model,
            l,
            w,
            block.beta
        );
        self.blocks.insert(key, Rc::clone(&block));
        Ok(block)
    }

    /// Forget every block. Instances keep theirs until the next setup.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
