use rand::distributions::Alphanumeric;
use rand::Rng;

const SESSION_ID_LEN: usize = 10;

/// Short random alphanumeric token suitable as a session or sub-session id.
///
/// Uniqueness is only probabilistic; the control channel still rejects reuse.
pub fn random_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}
