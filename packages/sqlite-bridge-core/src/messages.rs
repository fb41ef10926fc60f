use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::BridgeError;

/// Correlation token chosen by the host. Echoed back untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u32> for RequestId {
    fn from(value: u32) -> Self {
        RequestId::Number(value.into())
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::Text(value.to_string())
    }
}

// Messages from the host
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Value>>,
}

impl RequestEnvelope {
    pub fn new(id: impl Into<RequestId>, method: &str, params: Vec<Value>) -> Self {
        RequestEnvelope {
            id: id.into(),
            method: method.to_string(),
            params: Some(params),
        }
    }

    pub fn params(&self) -> &[Value] {
        self.params.as_deref().unwrap_or(&[])
    }
}

/// Exactly one of these is posted back per request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub id: RequestId,
    pub outcome: Result<Value, String>,
}

impl ResponseEnvelope {
    pub fn success(id: RequestId, result: Value) -> Self {
        ResponseEnvelope {
            id,
            outcome: Ok(result),
        }
    }

    pub fn failure(id: RequestId, err: &BridgeError) -> Self {
        ResponseEnvelope {
            id,
            outcome: Err(err.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }
}

impl Serialize for ResponseEnvelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("ResponseEnvelope", 2)?;
        state.serialize_field("id", &self.id)?;
        match &self.outcome {
            Ok(result) => state.serialize_field("result", result)?,
            Err(error) => state.serialize_field("error", error)?,
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for ResponseEnvelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            id: RequestId,
            #[serde(default)]
            result: Option<Value>,
            #[serde(default)]
            error: Option<String>,
        }

        let wire = Wire::deserialize(deserializer)?;
        let outcome = match wire.error {
            Some(error) => Err(error),
            None => Ok(wire.result.unwrap_or(Value::Null)),
        };
        Ok(ResponseEnvelope {
            id: wire.id,
            outcome,
        })
    }
}

// Control messages carry no id and never answer a request
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "worker-ready")]
    WorkerReady,
    #[serde(rename = "worker-error")]
    WorkerError { error: String },
}

/// The operations a request can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Init,
    Execute,
    Prepare,
    Run,
    Free,
    Close,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Init => "init",
            Method::Execute => "execute",
            Method::Prepare => "prepare",
            Method::Run => "run",
            Method::Free => "free",
            Method::Close => "close",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(Method::Init),
            "execute" => Ok(Method::Execute),
            "prepare" => Ok(Method::Prepare),
            "run" => Ok(Method::Run),
            "free" => Ok(Method::Free),
            "close" => Ok(Method::Close),
            other => Err(BridgeError::UnknownMethod(other.to_string())),
        }
    }
}
