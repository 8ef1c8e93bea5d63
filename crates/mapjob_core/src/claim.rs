/// Change in authentication between two session notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthTransition {
    SignedIn { user_id: String },
    SignedOut,
    /// Same user, still anonymous, or a direct switch between accounts.
    Unchanged,
}

pub fn detect_transition(previous: Option<&str>, current: Option<&str>) -> AuthTransition {
    match (previous, current) {
        (None, Some(user_id)) => AuthTransition::SignedIn {
            user_id: user_id.to_string(),
        },
        (Some(_), None) => AuthTransition::SignedOut,
        _ => AuthTransition::Unchanged,
    }
}

/// Merges locally pending ids with the job shown on the completion screen,
/// dropping duplicates but keeping first-seen order.
pub fn claim_batch(pending: &[String], snapshot_job_id: Option<&str>) -> Vec<String> {
    let mut batch: Vec<String> = Vec::with_capacity(pending.len() + 1);
    for id in pending
        .iter()
        .map(String::as_str)
        .chain(snapshot_job_id)
    {
        let id = id.trim();
        if !id.is_empty() && !batch.iter().any(|existing| existing == id) {
            batch.push(id.to_string());
        }
    }
    batch
}
