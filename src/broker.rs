//! MQTT publishing of samples.
//!
//! The client's event loop is driven inline by the sample loop instead of
//! from a background task: `connect` polls until the broker's CONNACK,
//! `call` queues one QoS 0 publish and polls until it has been written out.
//! Both are bounded by the supervisor's timeout.

use crate::config::BrokerConfig;
use crate::supervisor::{Link, LinkError};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tracing::debug;

const REQUEST_CHANNEL_CAPACITY: usize = 10;

pub struct MqttLink {
    config: BrokerConfig,
    session: Option<(AsyncClient, EventLoop)>,
}

impl MqttLink {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config, session: None }
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.as_str(),
            self.config.host.as_str(),
            self.config.port,
        );
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);
        options
    }
}

impl Link for MqttLink {
    type Request = String;
    type Response = ();

    fn name(&self) -> &str {
        &self.config.host
    }

    async fn connect(&mut self) -> Result<(), LinkError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CHANNEL_CAPACITY);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!("CONNACK from {}: {:?}", self.config.host, ack.code);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(LinkError::ConnectionFailure(format!(
                        "{}:{}: {}",
                        self.config.host, self.config.port, e
                    )));
                }
            }
        }

        self.session = Some((client, eventloop));
        Ok(())
    }

    async fn call(&mut self, payload: String) -> Result<(), LinkError> {
        let (client, eventloop) = self.session.as_mut().ok_or(LinkError::NotConnected)?;

        client
            .try_publish(self.config.topic.as_str(), QoS::AtMostOnce, false, payload)
            .map_err(|e| LinkError::PublishFailure(e.to_string()))?;

        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Publish(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(LinkError::PublishFailure(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if let Some((client, _)) = self.session.take() {
            // Best effort; the socket goes away with the event loop anyway
            let _ = client.try_disconnect();
            debug!("Dropped MQTT session to {}", self.config.host);
        }
    }
}
