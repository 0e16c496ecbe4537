//! Data subscriber -- receives proxy broadcasts, filtered by topic prefix.
//!
//! The proxy fans every message out to every subscriber; filtering happens
//! here, at the subscriber socket layer, by byte-prefix on the topic.

use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::codec::Framed;

use benchnet_protocol::{DataCodec, DataMessage};

use crate::ComponentError;

pub struct DataSubscriber {
    framed: Framed<TcpStream, DataCodec>,
    topics: Vec<String>,
}

fn topic_matches(subscriptions: &[String], topic: &str) -> bool {
    subscriptions
        .iter()
        .any(|prefix| topic.starts_with(prefix.as_str()))
}

impl DataSubscriber {
    pub async fn connect(host: &str, port: u16) -> Result<Self, ComponentError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        tracing::info!(host, port, "subscriber connected");
        Ok(Self {
            framed: Framed::new(stream, DataCodec::new()),
            topics: Vec::new(),
        })
    }

    /// Subscribe to all topics starting with `topic`.
    pub fn subscribe(&mut self, topic: &str) {
        if !self.topics.iter().any(|t| t == topic) {
            self.topics.push(topic.to_owned());
        }
    }

    pub fn unsubscribe(&mut self, topic: &str) {
        self.topics.retain(|t| t != topic);
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.topics
    }

    /// Receive the next message on a subscribed topic, waiting up to
    /// `timeout`. Non-matching messages are skipped unread.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Option<DataMessage>, ComponentError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match tokio::time::timeout(remaining, self.framed.next()).await {
                Err(_elapsed) => return Ok(None),
                Ok(None) => return Err(ComponentError::ConnectionClosed),
                Ok(Some(Err(error))) => return Err(error.into()),
                Ok(Some(Ok(message))) => {
                    if topic_matches(&self.topics, &message.topic) {
                        return Ok(Some(message));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_prefix_matching() {
        let subs = vec!["N1.p".to_string()];
        assert!(topic_matches(&subs, "N1.p"));
        assert!(topic_matches(&subs, "N1.pump")); // prefix semantics
        assert!(!topic_matches(&subs, "N1.q"));
        assert!(!topic_matches(&subs, "N2.p"));
    }

    #[test]
    fn test_empty_subscription_list_matches_nothing() {
        assert!(!topic_matches(&[], "N1.p"));
    }

    #[test]
    fn test_empty_prefix_matches_everything() {
        let subs = vec![String::new()];
        assert!(topic_matches(&subs, "N1.p"));
        assert!(topic_matches(&subs, ""));
    }
}
