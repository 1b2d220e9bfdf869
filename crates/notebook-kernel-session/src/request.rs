//! Inbound request decoding.

use notebook_kernel_core::{
    Envelope, MessageContent,
    message::{
        ExecuteRequest, InterruptRequest, IsCompleteRequest, KernelInfoRequest, ShutdownRequest,
    },
};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Request content does not match its declared kind.
#[derive(Debug, Error)]
#[error("Invalid {msg_type} content: {source}")]
pub struct ContentError {
    pub msg_type: String,
    #[source]
    pub source: serde_json::Error,
}

/// Every request kind the kernel handles.
#[derive(Debug, Clone)]
pub enum Request {
    KernelInfo(KernelInfoRequest),
    IsComplete(IsCompleteRequest),
    Execute(ExecuteRequest),
    Shutdown(ShutdownRequest),
    Interrupt(InterruptRequest),
}

impl Request {
    /// Decode the typed request carried by `envelope`.
    ///
    /// Returns `Ok(None)` for message kinds the kernel does not handle.
    ///
    /// # Errors
    /// Returns error if the content does not match the message kind.
    pub fn from_envelope(envelope: &Envelope) -> Result<Option<Self>, ContentError> {
        let request = match envelope.msg_type() {
            KernelInfoRequest::MSG_TYPE => Self::KernelInfo(content(envelope)?),
            IsCompleteRequest::MSG_TYPE => Self::IsComplete(content(envelope)?),
            ExecuteRequest::MSG_TYPE => Self::Execute(content(envelope)?),
            ShutdownRequest::MSG_TYPE => Self::Shutdown(content(envelope)?),
            InterruptRequest::MSG_TYPE => Self::Interrupt(content(envelope)?),
            _ => return Ok(None),
        };
        Ok(Some(request))
    }

    #[must_use]
    pub const fn msg_type(&self) -> &'static str {
        match self {
            Self::KernelInfo(_) => KernelInfoRequest::MSG_TYPE,
            Self::IsComplete(_) => IsCompleteRequest::MSG_TYPE,
            Self::Execute(_) => ExecuteRequest::MSG_TYPE,
            Self::Shutdown(_) => ShutdownRequest::MSG_TYPE,
            Self::Interrupt(_) => InterruptRequest::MSG_TYPE,
        }
    }
}

fn content<C: MessageContent + DeserializeOwned>(envelope: &Envelope) -> Result<C, ContentError> {
    envelope.parse_content().map_err(|source| ContentError {
        msg_type: C::MSG_TYPE.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn envelope(msg_type: &str, content: serde_json::Value) -> Envelope {
        let mut env = Envelope::new(&KernelInfoRequest {}, "s", "u").unwrap();
        env.header.msg_type = msg_type.to_string();
        env.content = content;
        env
    }

    #[test]
    fn test_decodes_known_kinds() {
        let req = Request::from_envelope(&envelope("execute_request", json!({"code": "1+1"})))
            .unwrap()
            .unwrap();
        match req {
            Request::Execute(exec) => {
                assert_eq!(exec.code, "1+1");
                assert!(exec.store_history);
                assert!(!exec.silent);
            }
            other => panic!("unexpected request {other:?}"),
        }

        let req = Request::from_envelope(&envelope("shutdown_request", json!({"restart": true})))
            .unwrap()
            .unwrap();
        assert!(matches!(req, Request::Shutdown(ShutdownRequest { restart: true })));
        assert_eq!(req.msg_type(), "shutdown_request");

        assert!(matches!(
            Request::from_envelope(&envelope("kernel_info_request", json!({}))),
            Ok(Some(Request::KernelInfo(_)))
        ));
    }

    #[test]
    fn test_unknown_kind_is_not_handled() {
        let res = Request::from_envelope(&envelope("comm_open", json!({}))).unwrap();
        assert!(res.is_none());
    }

    #[test]
    fn test_bad_content() {
        let err = Request::from_envelope(&envelope("is_complete_request", json!({"code": 7})))
            .unwrap_err();
        assert_eq!(err.msg_type, "is_complete_request");
        assert!(err.to_string().starts_with("Invalid is_complete_request content"));
    }
}
