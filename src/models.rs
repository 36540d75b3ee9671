use serde::Serialize;

/// A stored broker identity. Rows are append-only; only the highest `id` is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub id: i64,
    pub client_id: String,
    pub secret: String,
    pub host: String,
}

/// Credentials as entered by the operator, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredentials {
    pub client_id: String,
    pub secret: String,
    pub host: String,
}

impl Credentials {
    pub fn sensor_topic(&self) -> String {
        format!("devices/{}/sensors", self.client_id)
    }
}

/// One sensor value, built per tick and dropped after the publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TelemetryReading {
    pub value: i64,
}

impl TelemetryReading {
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
