use std::sync::Arc;

use ledger_integration::{ActionSubmitter, EventSource};
use shared::domain::{AccountId, ContractAddress};

/// Connection state for one contract as one account, built once and passed by reference.
pub struct LedgerSession {
    account: AccountId,
    contract: ContractAddress,
    source: Arc<dyn EventSource>,
    submitter: Arc<dyn ActionSubmitter>,
}

impl LedgerSession {
    pub fn new(
        account: AccountId,
        contract: ContractAddress,
        source: Arc<dyn EventSource>,
        submitter: Arc<dyn ActionSubmitter>,
    ) -> Self {
        Self {
            account,
            contract,
            source,
            submitter,
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn contract(&self) -> &ContractAddress {
        &self.contract
    }

    pub fn source(&self) -> &Arc<dyn EventSource> {
        &self.source
    }

    pub fn submitter(&self) -> &Arc<dyn ActionSubmitter> {
        &self.submitter
    }
}
