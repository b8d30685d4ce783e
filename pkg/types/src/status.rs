use serde::{Deserialize, Serialize};

/// Body of the status API's `GET /api/v1/leader`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderStatus {
    pub identity: String,
    pub lease: String,
    pub namespace: String,
    pub backend: String,
    pub leader: bool,
}
