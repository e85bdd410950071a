//! Module that contains all the different message types sent in the network.
//!
//! Every message is a JSON object whose `code` field names the variant. The
//! manager talks to philosophers with [`ControlRequest`]/[`ControlResponse`],
//! neighbors talk to each other with [`RingRequest`]/[`RingResponse`].

use crate::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt, net::IpAddr};

/// Trait implemented by everything that travels on a connection.
pub trait Message: Serialize + DeserializeOwned {
    /// Function that returns the message as a JSON formatted `String`.
    fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Function that parses the message from a JSON formatted `String`.
    fn from_json_string(line: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Self>(line)?)
    }
}

/// `host:port` identity of a philosopher's ring server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self(format!("{host}:{port}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerAddress {
    fn from(address: &str) -> Self {
        Self(address.to_owned())
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two neighbors of a philosopher, sent on the wire as a two element list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(PeerAddress, PeerAddress)", into = "(PeerAddress, PeerAddress)")]
pub struct Pair {
    pub left: PeerAddress,
    pub right: PeerAddress,
}

impl Pair {
    pub fn new(left: PeerAddress, right: PeerAddress) -> Self {
        Self { left, right }
    }

    /// Neighbors in the order they are visited while eating.
    pub fn neighbors(&self) -> [&PeerAddress; 2] {
        [&self.left, &self.right]
    }

    pub fn contains(&self, address: &PeerAddress) -> bool {
        &self.left == address || &self.right == address
    }

    /// The neighbor that is not `address`, if `address` is one of them.
    pub fn other_than(&self, address: &PeerAddress) -> Option<&PeerAddress> {
        if &self.left == address {
            Some(&self.right)
        } else if &self.right == address {
            Some(&self.left)
        } else {
            None
        }
    }
}

impl From<(PeerAddress, PeerAddress)> for Pair {
    fn from((left, right): (PeerAddress, PeerAddress)) -> Self {
        Self { left, right }
    }
}

impl From<Pair> for (PeerAddress, PeerAddress) {
    fn from(pair: Pair) -> Self {
        (pair.left, pair.right)
    }
}

/// Whether forks may only be taken by the holder of the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Token,
    WithoutToken,
}

/// Enum that represents what a philosopher is currently doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiningState {
    #[default]
    Thinking,
    Eating,
    Sleeping,
}

/// A philosopher's belief about the token, sent as `[held, "host:port"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(bool, String)", into = "(bool, String)")]
pub struct Token {
    pub held: bool,
    pub next_holder: Option<PeerAddress>,
}

impl Token {
    pub fn held_for(next_holder: PeerAddress) -> Self {
        Self {
            held: true,
            next_holder: Some(next_holder),
        }
    }
}

impl From<(bool, String)> for Token {
    fn from((held, next_holder): (bool, String)) -> Self {
        Self {
            held,
            next_holder: (!next_holder.is_empty()).then(|| PeerAddress(next_holder)),
        }
    }
}

impl From<Token> for (bool, String) {
    fn from(token: Token) -> Self {
        (
            token.held,
            token.next_holder.map(|address| address.0).unwrap_or_default(),
        )
    }
}

/// Statistics a philosopher reports to the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub token: Token,
    pub deadlocks: u64,
    pub meals: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// Enum that represents the requests the manager sends to a philosopher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlRequest {
    GetPort,
    PostPairs {
        pairs: Pair,
        mode: Mode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        first: Option<PeerAddress>,
    },
    GetReady,
    PostBegin,
    GetStatusInfo,
    TimeToDie,
}

/// Enum that represents the responses a philosopher sends back to the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum ControlResponse {
    #[serde(rename = "GET_PORT_RESPONSE")]
    Port { port: u16 },
    #[serde(rename = "POST_PAIR_RESPONSE")]
    PairsAccepted,
    #[serde(rename = "GET_READY_RESPONSE")]
    Ready { ready: bool },
    #[serde(rename = "BEGIN_RESPONSE")]
    Begun,
    #[serde(rename = "GET_STATUS_INFO_RESPONSE")]
    StatusInfo(StatusReport),
    #[serde(rename = "FINALLY_DEAD_RESPONSE")]
    FinallyDead(StatusReport),
}

/// Enum that represents the requests neighbors send to each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RingRequest {
    GetForkStatus { port: u16 },
    PostToken { port: u16 },
}

/// Enum that represents the responses to a [`RingRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum RingResponse {
    #[serde(rename = "GET_FORK_STATUS_RESPONSE")]
    ForkStatus {
        #[serde(rename = "withFork")]
        with_fork: bool,
        state: DiningState,
    },
    #[serde(rename = "POST_TOKEN_RESPONSE")]
    TokenAccepted,
}

impl Message for ControlRequest {}
impl Message for ControlResponse {}
impl Message for RingRequest {}
impl Message for RingResponse {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;

    fn address(port: u16) -> PeerAddress {
        PeerAddress::new("127.0.0.1".parse().unwrap(), port)
    }

    #[test]
    fn control_requests_use_wire_codes() {
        let pairs = ControlRequest::PostPairs {
            pairs: Pair::new(address(9003), address(9002)),
            mode: Mode::Token,
            first: Some(address(9003)),
        };
        let encoded: serde_json::Value =
            serde_json::from_str(&pairs.to_json_string().unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({
                "code": "POST_PAIRS",
                "pairs": ["127.0.0.1:9003", "127.0.0.1:9002"],
                "mode": "TOKEN",
                "first": "127.0.0.1:9003",
            })
        );

        let without_first = ControlRequest::PostPairs {
            pairs: Pair::new(address(1), address(2)),
            mode: Mode::WithoutToken,
            first: None,
        };
        let encoded = without_first.to_json_string().unwrap();
        assert!(!encoded.contains("first"));
        assert!(encoded.contains("\"WITHOUT_TOKEN\""));

        assert_eq!(
            ControlRequest::TimeToDie.to_json_string().unwrap(),
            r#"{"code":"TIME_TO_DIE"}"#
        );
        assert_eq!(
            ControlRequest::GetStatusInfo.to_json_string().unwrap(),
            r#"{"code":"GET_STATUS_INFO"}"#
        );
    }

    #[test]
    fn control_requests_decode() {
        let cases = [
            (r#"{"code":"GET_PORT"}"#, ControlRequest::GetPort),
            (r#"{"code":"GET_READY"}"#, ControlRequest::GetReady),
            (r#"{"code":"POST_BEGIN"}"#, ControlRequest::PostBegin),
            (r#"{"code":"GET_STATUS_INFO"}"#, ControlRequest::GetStatusInfo),
            (r#"{"code":"TIME_TO_DIE"}"#, ControlRequest::TimeToDie),
            (
                r#"{"code":"POST_PAIRS","pairs":["127.0.0.1:1","127.0.0.1:2"],"mode":"WITHOUT_TOKEN"}"#,
                ControlRequest::PostPairs {
                    pairs: Pair::new(address(1), address(2)),
                    mode: Mode::WithoutToken,
                    first: None,
                },
            ),
        ];
        for (line, expected) in cases {
            assert_eq!(ControlRequest::from_json_string(line).unwrap(), expected);
        }
    }

    #[test]
    fn control_responses_decode() {
        let report = StatusReport {
            token: Token::held_for(address(9002)),
            deadlocks: 4,
            meals: 7,
            messages_sent: 30,
            messages_received: 29,
        };
        let cases = [
            (
                json!({"code": "GET_PORT_RESPONSE", "port": 9001}),
                ControlResponse::Port { port: 9001 },
            ),
            (json!({"code": "POST_PAIR_RESPONSE"}), ControlResponse::PairsAccepted),
            (
                json!({"code": "GET_READY_RESPONSE", "ready": false}),
                ControlResponse::Ready { ready: false },
            ),
            (json!({"code": "BEGIN_RESPONSE"}), ControlResponse::Begun),
            (
                json!({
                    "code": "GET_STATUS_INFO_RESPONSE",
                    "token": [true, "127.0.0.1:9002"],
                    "deadlocks": 4,
                    "meals": 7,
                    "messagesSent": 30,
                    "messagesReceived": 29,
                }),
                ControlResponse::StatusInfo(report.clone()),
            ),
            (
                json!({
                    "code": "FINALLY_DEAD_RESPONSE",
                    "token": [true, "127.0.0.1:9002"],
                    "deadlocks": 4,
                    "meals": 7,
                    "messagesSent": 30,
                    "messagesReceived": 29,
                }),
                ControlResponse::FinallyDead(report),
            ),
        ];
        for (value, expected) in cases {
            let decoded = ControlResponse::from_json_string(&value.to_string()).unwrap();
            assert_eq!(decoded, expected);
        }
    }

    #[test]
    fn ring_messages_decode() {
        assert_eq!(
            RingRequest::from_json_string(r#"{"code":"GET_FORK_STATUS","port":9001}"#).unwrap(),
            RingRequest::GetForkStatus { port: 9001 }
        );
        assert_eq!(
            RingRequest::from_json_string(r#"{"code":"POST_TOKEN","port":9003}"#).unwrap(),
            RingRequest::PostToken { port: 9003 }
        );
        assert_eq!(
            RingResponse::from_json_string(
                r#"{"code":"GET_FORK_STATUS_RESPONSE","withFork":true,"state":"EATING"}"#
            )
            .unwrap(),
            RingResponse::ForkStatus {
                with_fork: true,
                state: DiningState::Eating,
            }
        );
        assert_eq!(
            RingResponse::from_json_string(r#"{"code":"POST_TOKEN_RESPONSE"}"#).unwrap(),
            RingResponse::TokenAccepted
        );
    }

    #[test]
    fn incomplete_messages_are_malformed() {
        let lines = [
            "not json",
            r#"{"port":9001}"#,
            r#"{"code":"GET_PORT_RESPONSE"}"#,
            r#"{"code":"GET_PORT_RESPONSE","port":null}"#,
            r#"{"code":"GET_READY_RESPONSE"}"#,
            r#"{"code":"GET_STATUS_INFO_RESPONSE","token":[false,""],"meals":1}"#,
            r#"{"code":"NOT_A_CODE"}"#,
        ];
        for line in lines {
            assert!(
                matches!(ControlResponse::from_json_string(line), Err(Error::Malformed(_))),
                "{line} should not decode"
            );
        }
        assert!(matches!(
            RingResponse::from_json_string(r#"{"code":"GET_FORK_STATUS_RESPONSE","state":"EATING"}"#),
            Err(Error::Malformed(_))
        ));
        assert!(matches!(
            RingRequest::from_json_string(r#"{"code":"POST_TOKEN"}"#),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn empty_token_has_no_next_holder() {
        let token: Token = serde_json::from_str(r#"[false, ""]"#).unwrap();
        assert_eq!(token, Token::default());
        assert_eq!(serde_json::to_string(&Token::default()).unwrap(), r#"[false,""]"#);
    }

    #[test]
    fn pair_other_than() {
        let pair = Pair::new(address(1), address(2));
        assert_eq!(pair.other_than(&address(1)), Some(&address(2)));
        assert_eq!(pair.other_than(&address(2)), Some(&address(1)));
        assert_eq!(pair.other_than(&address(3)), None);
        assert!(pair.contains(&address(2)));
    }
}
