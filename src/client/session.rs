use reqwest::header::{HeaderMap, HeaderValue};
use taskboard_common::{CLIENT_ID_HEADER, ClientId};

/// One client session: the identity this process attaches to its mutations
/// and compares against incoming update events.
///
/// Created once at startup and passed to the request layer and the
/// reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSession {
    client_id: ClientId,
}

impl ClientSession {
    pub fn new() -> Self {
        Self::with_client_id(ClientId::generate())
    }

    pub fn with_client_id(client_id: ClientId) -> Self {
        Self { client_id }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// True when an event's origin is this session.
    pub fn is_own(&self, origin: Option<&ClientId>) -> bool {
        origin == Some(&self.client_id)
    }

    /// Headers attached to every mutation request.
    pub fn mutation_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(&self.client_id.to_string()) {
            Ok(value) => {
                headers.insert(CLIENT_ID_HEADER, value);
            }
            Err(e) => tracing::warn!(error = %e, "Client id is not a valid header value"),
        }
        headers
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}
