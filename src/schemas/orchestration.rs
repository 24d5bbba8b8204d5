use serde::{Deserialize, Serialize};

fn default_ignore_schedule() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartGraderQuery {
    #[serde(default = "default_ignore_schedule")]
    pub(crate) ignore_schedule: bool,
}

/// Returned with `202 Accepted` when an instance is scheduled or restarted.
#[derive(Debug, Serialize)]
pub(crate) struct StartResponse {
    pub(crate) id: String,
    pub(crate) status_query_get_uri: String,
}
