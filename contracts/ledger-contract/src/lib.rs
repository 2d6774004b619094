#[cfg(feature = "contract")]
mod contract_impl {
    use freenet_stdlib::prelude::*;
    use pharmachain_common::ledger::{LedgerDelta, LedgerState, LedgerSummary};

    pub struct Contract;

    fn parse_state(bytes: &[u8]) -> Result<LedgerState, ContractError> {
        serde_json::from_slice(bytes).map_err(|e| ContractError::Deser(e.to_string()))
    }

    fn apply_delta(ledger: &mut LedgerState, delta: LedgerDelta) -> Result<(), ContractError> {
        ledger
            .apply_delta(delta)
            .map_err(|e| ContractError::Other(format!("{}: {e}", e.kind())))
    }

    /// A full state pushed by a peer.
    fn sync_state(ledger: &mut LedgerState, bytes: &[u8]) -> Result<(), ContractError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let other = parse_state(bytes)?;
        apply_delta(ledger, LedgerDelta::Sync(other))
    }

    /// A signed transition or a sync payload.
    fn apply_update(ledger: &mut LedgerState, bytes: &[u8]) -> Result<(), ContractError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let delta: LedgerDelta =
            serde_json::from_slice(bytes).map_err(|e| ContractError::Deser(e.to_string()))?;
        apply_delta(ledger, delta)
    }

    #[contract]
    impl ContractInterface for Contract {
        fn validate_state(
            _parameters: Parameters<'static>,
            state: State<'static>,
            _related: RelatedContracts<'static>,
        ) -> Result<ValidateResult, ContractError> {
            let bytes = state.as_ref();
            if bytes.is_empty() {
                return Ok(ValidateResult::Valid);
            }
            let ledger = parse_state(bytes)?;
            if !ledger.validate() {
                return Ok(ValidateResult::Invalid);
            }
            Ok(ValidateResult::Valid)
        }

        fn update_state(
            _parameters: Parameters<'static>,
            state: State<'static>,
            data: Vec<UpdateData<'static>>,
        ) -> Result<UpdateModification<'static>, ContractError> {
            let mut ledger = if state.is_empty() {
                LedgerState::new()
            } else {
                parse_state(state.as_ref())?
            };

            for ud in data {
                match ud {
                    UpdateData::State(s) => sync_state(&mut ledger, s.as_ref())?,
                    UpdateData::Delta(d) => apply_update(&mut ledger, d.as_ref())?,
                    UpdateData::StateAndDelta { state, delta } => {
                        sync_state(&mut ledger, state.as_ref())?;
                        apply_update(&mut ledger, delta.as_ref())?;
                    }
                    _ => return Err(ContractError::InvalidUpdate),
                }
            }

            let serialized =
                serde_json::to_vec(&ledger).map_err(|e| ContractError::Other(e.to_string()))?;
            Ok(UpdateModification::valid(State::from(serialized)))
        }

        fn summarize_state(
            _parameters: Parameters<'static>,
            state: State<'static>,
        ) -> Result<StateSummary<'static>, ContractError> {
            if state.is_empty() {
                return Ok(StateSummary::from(vec![]));
            }
            let ledger = parse_state(state.as_ref())?;
            let serialized = serde_json::to_vec(&ledger.summarize())
                .map_err(|e| ContractError::Other(e.to_string()))?;
            Ok(StateSummary::from(serialized))
        }

        fn get_state_delta(
            _parameters: Parameters<'static>,
            state: State<'static>,
            summary: StateSummary<'static>,
        ) -> Result<StateDelta<'static>, ContractError> {
            if state.is_empty() {
                return Ok(StateDelta::from(vec![]));
            }
            let ledger = parse_state(state.as_ref())?;
            let summary: LedgerSummary = if summary.is_empty() {
                LedgerSummary::default()
            } else {
                serde_json::from_slice(summary.as_ref())
                    .map_err(|e| ContractError::Deser(e.to_string()))?
            };

            match ledger.delta(&summary) {
                Some(newer) => {
                    let serialized = serde_json::to_vec(&LedgerDelta::Sync(newer))
                        .map_err(|e| ContractError::Other(e.to_string()))?;
                    Ok(StateDelta::from(serialized))
                }
                None => Ok(StateDelta::from(vec![])),
            }
        }
    }
}
