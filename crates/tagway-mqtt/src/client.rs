// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! [`MqttTransport`] backed by `rumqttc`.
//!
//! Each connect opens a fresh session and polls its event loop on a
//! dedicated task until the connection fails or is closed. Reconnecting is
//! left to the driver, which calls [`MqttTransport::connect`] again.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet};
use tagway_core::{DriverError, DriverEvents, DriverResult};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::settings::{MqttSettings, QoS};
use crate::transport::{IncomingMessage, MessageHandler, MqttTransport};

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 100;

/// How long a closing session may take to flush its disconnect.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

fn to_rumqttc(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

struct Session {
    client: AsyncClient,
    task: JoinHandle<()>,
    closing: Arc<AtomicBool>,
}

/// MQTT client transport.
pub struct RumqttcTransport {
    settings: MqttSettings,
    session: Mutex<Option<Session>>,
    connected: Arc<AtomicBool>,
}

impl RumqttcTransport {
    /// Creates a transport for the broker in `settings`.
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);
        options
    }

    fn client(&self) -> DriverResult<AsyncClient> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.client.clone())
            .ok_or(DriverError::NotConnected)
    }

    async fn close(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        self.connected.store(false, Ordering::SeqCst);
        session.closing.store(true, Ordering::SeqCst);

        if let Err(e) = session.client.disconnect().await {
            debug!(error = %e, "Disconnect request not sent");
        }
        let mut task = session.task;
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            task.abort();
        }
    }
}

/// Waits for the broker to accept the session.
async fn handshake(eventloop: &mut EventLoop) -> DriverResult<()> {
    loop {
        let event = eventloop
            .poll()
            .await
            .map_err(|e| DriverError::connection_failed_with("MQTT connect failed", e))?;
        if let Event::Incoming(Packet::ConnAck(ack)) = event {
            return match ack.code {
                ConnectReturnCode::Success => Ok(()),
                code => Err(DriverError::connection_failed(format!(
                    "Broker refused connection: {:?}",
                    code
                ))),
            };
        }
    }
}

#[instrument(name = "mqtt_event_loop", skip_all)]
async fn run_event_loop(
    mut eventloop: EventLoop,
    handler: Arc<dyn MessageHandler>,
    events: DriverEvents,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!(topic = %publish.topic, bytes = publish.payload.len(), "Message received");
                handler.on_message(IncomingMessage::new(publish.topic, publish.payload.to_vec()));
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                if !closing.load(Ordering::SeqCst) {
                    events.connection_lost("broker sent disconnect");
                }
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Session closed");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                if !closing.load(Ordering::SeqCst) {
                    warn!(error = %e, "MQTT connection lost");
                    events.connection_lost(e.to_string());
                }
                break;
            }
        }
    }
}

#[async_trait]
impl MqttTransport for RumqttcTransport {
    async fn connect(&self, events: DriverEvents, handler: Arc<dyn MessageHandler>) -> DriverResult<()> {
        self.close().await;

        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        handshake(&mut eventloop).await?;
        self.connected.store(true, Ordering::SeqCst);
        info!(broker = %self.settings.broker(), "MQTT session established");

        let closing = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_event_loop(
            eventloop,
            handler,
            events,
            self.connected.clone(),
            closing.clone(),
        ));
        *self.session.lock() = Some(Session {
            client,
            task,
            closing,
        });
        Ok(())
    }

    async fn disconnect(&self) -> DriverResult<()> {
        self.close().await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> DriverResult<()> {
        self.client()?
            .subscribe(filter, to_rumqttc(qos))
            .await
            .map_err(|e| DriverError::subscription(format!("subscribe {}: {}", filter, e)))
    }

    async fn unsubscribe(&self, filter: &str) -> DriverResult<()> {
        self.client()?
            .unsubscribe(filter)
            .await
            .map_err(|e| DriverError::subscription(format!("unsubscribe {}: {}", filter, e)))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> DriverResult<()> {
        self.client()?
            .publish(topic, to_rumqttc(qos), retain, payload)
            .await
            .map_err(|e| DriverError::protocol(format!("publish {}: {}", topic, e)))
    }
}

impl fmt::Debug for RumqttcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RumqttcTransport")
            .field("broker", &self.settings.broker())
            .field("client_id", &self.settings.client_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}
