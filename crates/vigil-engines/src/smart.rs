//! Strategy cascade: try progressively stronger engines.
//!
//! 1. k-induction at a small strengthening depth (fast, settles most
//!    inductive properties and shallow bugs)
//! 2. IC3 over predicate clauses (unbounded)
//! 3. BMC up to the requested bound (bounded fallback)
//!
//! The first definitive verdict wins.

use tracing::info;
use vigil_ts::Property;

use crate::witness::TraceStep;
use crate::{bmc, ic3, kind, CheckOptions, EngineResult, Prover, ProverResult};

/// Depth at which the k-induction attempt is capped; deeper strengthening
/// rarely pays off before IC3 does.
const KIND_DEPTH_CAP: usize = 5;

pub struct Smart {
    property: Property,
    opts: CheckOptions,
    trace: Option<Vec<TraceStep>>,
}

impl Smart {
    pub fn new(property: Property, opts: &CheckOptions) -> Self {
        Smart {
            property,
            opts: opts.clone(),
            trace: None,
        }
    }
}

impl Prover for Smart {
    fn initialize(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn check_until(&mut self, k: usize) -> EngineResult<ProverResult> {
        info!("smart: trying k-induction");
        let mut kind = kind::KInduction::new(self.property.clone(), &self.opts);
        match kind.check_until(k.min(KIND_DEPTH_CAP))? {
            ProverResult::Safe => {
                info!("smart: proved by k-induction");
                return Ok(ProverResult::Safe);
            }
            ProverResult::Unsafe => {
                self.trace = kind.witness();
                return Ok(ProverResult::Unsafe);
            }
            ProverResult::Unknown => {}
        }

        info!("smart: trying IC3");
        let mut ic3 = ic3::Ic3::predicate(self.property.clone(), &self.opts);
        match ic3.check_until(k)? {
            ProverResult::Safe => {
                info!("smart: proved by IC3");
                return Ok(ProverResult::Safe);
            }
            ProverResult::Unsafe => {
                self.trace = ic3.witness();
                return Ok(ProverResult::Unsafe);
            }
            ProverResult::Unknown => {}
        }

        info!("smart: falling back to BMC");
        let mut bmc = bmc::Bmc::new(self.property.clone(), &self.opts);
        let verdict = bmc.check_until(k)?;
        if verdict == ProverResult::Unsafe {
            self.trace = bmc.witness();
        }
        Ok(verdict)
    }

    fn witness(&self) -> Option<Vec<TraceStep>> {
        self.trace.clone()
    }
}
