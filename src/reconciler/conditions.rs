use crate::apis::{ConditionType, Conditions};
use crate::error::ReconcileError;

/// Merges the outcome of the latest operation into `conditions`.
///
/// Terminal errors set `Terminal` and leave `Recoverable` as it was. Anything
/// else clears `Terminal` if present and drives `Recoverable` from the error.
/// Conditions are synthesized on first need and never removed. Returns whether
/// any condition exists afterwards, i.e. whether a status write is warranted.
pub fn update_conditions(
    conditions: &mut Conditions,
    err: Option<&ReconcileError>,
    terminal_codes: &[&str],
) -> bool {
    match err {
        Some(err) if err.is_terminal_for(terminal_codes) => {
            conditions
                .ensure(ConditionType::Terminal)
                .set(true, Some(err.to_string()));
        }
        _ => {
            if let Some(terminal) = conditions.get_mut(ConditionType::Terminal) {
                terminal.set(false, None);
            }
            match err {
                Some(err) => conditions
                    .ensure(ConditionType::Recoverable)
                    .set(true, Some(err.to_string())),
                None => {
                    if let Some(recoverable) = conditions.get_mut(ConditionType::Recoverable) {
                        recoverable.set(false, None);
                    }
                }
            }
        }
    }
    !conditions.is_empty()
}

/// `Synced` is true only for a successful pass on a settled resource.
pub fn set_synced(conditions: &mut Conditions, synced: bool, message: Option<String>) {
    conditions.ensure(ConditionType::Synced).set(synced, message);
}
