use serde::{Deserialize, Serialize};

/// Subscription category used by greetings.
pub const CHAT_SUBSCRIPTION: &str = "chat";

/// A live push channel registered in the connection directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub connection_id: String,
    pub subscription_type: String,
    /// Subject id of the user who owns this channel
    pub owner_identity: String,
    /// Subject id of the peer this channel expects; may be empty
    pub partner_identity: String,
}

impl ConnectionRecord {
    pub fn new(
        connection_id: impl Into<String>,
        subscription_type: impl Into<String>,
        owner_identity: impl Into<String>,
        partner_identity: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            subscription_type: subscription_type.into(),
            owner_identity: owner_identity.into(),
            partner_identity: partner_identity.into(),
        }
    }
}

/// A stored direct message. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub message_id: String,
    #[serde(rename = "message")]
    pub content: String,
    #[serde(rename = "fromSub")]
    pub from_identity: String,
    #[serde(rename = "toSub")]
    pub to_identity: String,
    /// Client-supplied logical clock
    pub timestamp: i64,
    /// Store insertion order, used to break timestamp ties
    #[serde(skip)]
    pub sequence: i64,
}

/// Result of a single push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PushOutcome {
    pub delivered: bool,
    /// The target was reported gone and its record deleted
    pub removed: bool,
}

impl PushOutcome {
    pub fn delivered() -> Self {
        Self {
            delivered: true,
            removed: false,
        }
    }

    pub fn dropped() -> Self {
        Self::default()
    }

    pub fn gone() -> Self {
        Self {
            delivered: false,
            removed: true,
        }
    }
}

/// Aggregate of a fanout across several connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanoutReport {
    pub attempted: usize,
    pub delivered: usize,
    pub removed: usize,
}

impl FanoutReport {
    pub fn record(&mut self, outcome: PushOutcome) {
        self.attempted += 1;
        if outcome.delivered {
            self.delivered += 1;
        }
        if outcome.removed {
            self.removed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_record_wire_names() {
        let record = MessageRecord {
            message_id: "m1".into(),
            content: "hi".into(),
            from_identity: "alice".into(),
            to_identity: "bob".into(),
            timestamp: 1000,
            sequence: 7,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "messageId": "m1",
                "message": "hi",
                "fromSub": "alice",
                "toSub": "bob",
                "timestamp": 1000
            })
        );
    }

    #[test]
    fn test_fanout_report_counts() {
        let mut report = FanoutReport::default();
        report.record(PushOutcome::delivered());
        report.record(PushOutcome::gone());
        report.record(PushOutcome::dropped());

        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.removed, 1);
    }
}
