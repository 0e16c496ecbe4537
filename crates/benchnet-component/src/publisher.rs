//! Data publisher -- pushes measurement and log streams into the proxy.

use bytes::Bytes;
use futures::SinkExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use benchnet_protocol::{DataCodec, DataMessage};

use crate::ComponentError;

/// Publishes data messages under the component's full name as topic.
pub struct DataPublisher {
    full_name: String,
    framed: Framed<TcpStream, DataCodec>,
}

impl DataPublisher {
    pub async fn connect(full_name: &str, host: &str, port: u16) -> Result<Self, ComponentError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        tracing::info!(full_name, host, port, "publisher connected");
        Ok(Self {
            full_name: full_name.to_owned(),
            framed: Framed::new(stream, DataCodec::new()),
        })
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub async fn send_message(&mut self, message: DataMessage) -> Result<(), ComponentError> {
        self.framed.send(message).await?;
        Ok(())
    }

    /// Publish `data` as a JSON message under the own full name.
    pub async fn send_data(&mut self, data: &Value) -> Result<(), ComponentError> {
        let message = DataMessage::json(&self.full_name, data)?;
        self.send_message(message).await
    }

    /// Publish raw binary frames under the own full name.
    pub async fn send_frames(
        &mut self,
        message_type: benchnet_protocol::MessageType,
        frames: Vec<Bytes>,
    ) -> Result<(), ComponentError> {
        let message = DataMessage::new(&self.full_name, message_type, frames);
        self.send_message(message).await
    }

    /// Publish a log record: `[asctime, levelname, logger_name, text]`.
    pub async fn send_log_entry(
        &mut self,
        level: &str,
        logger: &str,
        text: &str,
    ) -> Result<(), ComponentError> {
        let asctime = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let entry = serde_json::json!([asctime, level, logger, text]);
        self.send_data(&entry).await
    }
}
