use std::sync::Arc;

use super::commission::{CommissionSchedule, ZeroCommission};
use super::MatchingService;
use crate::error::{Result, SimError};
use crate::market::TickSource;
use crate::orderbook::FillPolicy;

pub struct MatchingServiceBuilder {
    source: Option<Arc<dyn TickSource>>,
    commission: Option<Arc<dyn CommissionSchedule>>,
    fill_policy: FillPolicy,
}

impl MatchingServiceBuilder {
    pub fn build(&mut self) -> Result<Arc<MatchingService>> {
        let Some(source) = self.source.clone() else {
            return Err(SimError::contract_violation(
                "matching service must have a tick source",
            ));
        };
        let commission = self
            .commission
            .clone()
            .unwrap_or_else(|| Arc::new(ZeroCommission));
        Ok(MatchingService::new(source, commission, self.fill_policy))
    }

    pub fn with_source(&mut self, source: Arc<dyn TickSource>) -> &mut Self {
        self.source = Some(source);
        self
    }

    pub fn with_commission(&mut self, commission: Arc<dyn CommissionSchedule>) -> &mut Self {
        self.commission = Some(commission);
        self
    }

    pub fn with_fill_policy(&mut self, fill_policy: FillPolicy) -> &mut Self {
        self.fill_policy = fill_policy;
        self
    }

    pub fn new() -> Self {
        Self {
            source: None,
            commission: None,
            fill_policy: FillPolicy::default(),
        }
    }
}

impl Default for MatchingServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
