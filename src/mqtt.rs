use core::ptr::NonNull;

use embassy_net::{tcp::TcpSocket, Stack};
use embassy_time::with_timeout;
use log::{debug, error, info, warn};
use rust_mqtt::{
    client::{
        client::MqttClient,
        client_config::{ClientConfig, MqttVersion},
    },
    packet::v5::publish_packet::QualityOfService,
    utils::rng_generator::CountingRng,
};

use crate::config::Field;
use crate::connectivity::{BrokerSession, SessionOptions};
use crate::constants::{
    MQTT_MAX_DRAIN, MQTT_MAX_PROPERTIES, MQTT_POLL_TIMEOUT, MQTT_RX_BUFFER_SIZE,
    MQTT_TX_BUFFER_SIZE, RX_BUFFER_SIZE, TX_BUFFER_SIZE,
};
use crate::cstr::write_trimmed_field;
use crate::error::BrokerError;
use crate::identity::MAC_TEXT_LEN;
use crate::transport;

type Client = MqttClient<'static, TcpSocket<'static>, MQTT_MAX_PROPERTIES, CountingRng>;

/// Memory a broker session borrows for its whole life: socket and MQTT
/// buffers plus the credentials the CONNECT packet refers to.
pub struct SessionMemory {
    socket_rx: [u8; RX_BUFFER_SIZE],
    socket_tx: [u8; TX_BUFFER_SIZE],
    mqtt_rx: [u8; MQTT_RX_BUFFER_SIZE],
    mqtt_tx: [u8; MQTT_TX_BUFFER_SIZE],
    client_id: heapless::String<MAC_TEXT_LEN>,
    username: Field,
    password: Field,
}

impl SessionMemory {
    pub const fn new() -> Self {
        Self {
            socket_rx: [0; RX_BUFFER_SIZE],
            socket_tx: [0; TX_BUFFER_SIZE],
            mqtt_rx: [0; MQTT_RX_BUFFER_SIZE],
            mqtt_tx: [0; MQTT_TX_BUFFER_SIZE],
            client_id: heapless::String::new(),
            username: heapless::String::new(),
            password: heapless::String::new(),
        }
    }
}

/// MQTT v5 session over plain TCP
pub struct Mqtt {
    stack: Stack<'static>,
    memory: NonNull<SessionMemory>,
    client: Option<Client>,
}

impl Mqtt {
    pub fn new(stack: Stack<'static>, memory: &'static mut SessionMemory) -> Self {
        Self {
            stack,
            memory: NonNull::from(memory),
            client: None,
        }
    }
}

impl BrokerSession for Mqtt {
    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        options: &SessionOptions<'_>,
    ) -> Result<(), BrokerError> {
        // release every borrow of the session memory before handing it out again
        self.client = None;

        // SAFETY: `memory` comes from a `&'static mut` owned by this session and
        // the only references derived from it lived in the client dropped above.
        let memory: &'static mut SessionMemory = unsafe { self.memory.as_mut() };
        let SessionMemory {
            socket_rx,
            socket_tx,
            mqtt_rx,
            mqtt_tx,
            client_id,
            username,
            password,
        } = memory;

        *client_id = write_trimmed_field(options.client_id).map_err(|_| BrokerError::HandshakeFailed)?;
        *username = write_trimmed_field(options.username).map_err(|_| BrokerError::HandshakeFailed)?;
        *password = write_trimmed_field(options.password).map_err(|_| BrokerError::HandshakeFailed)?;
        let client_id: &'static str = client_id;
        let username: &'static str = username;
        let password: &'static str = password;

        let socket = transport::connect(self.stack, socket_rx, socket_tx, host, port)
            .await
            .map_err(|e| {
                warn!("Broker transport failed: {:?}", e);
                BrokerError::HandshakeFailed
            })?;

        let mut config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(20000));
        config.add_max_subscribe_qos(QualityOfService::QoS1);
        config.add_client_id(client_id);
        if !username.is_empty() {
            config.add_username(username);
            config.add_password(password);
        }
        config.keep_alive = options.keepalive.as_secs() as u16;
        config.max_packet_size = MQTT_RX_BUFFER_SIZE as u32;

        let mut client = MqttClient::<_, MQTT_MAX_PROPERTIES, _>::new(
            socket,
            mqtt_tx,
            MQTT_TX_BUFFER_SIZE,
            mqtt_rx,
            MQTT_RX_BUFFER_SIZE,
            config,
        );

        match client.connect_to_broker().await {
            Ok(()) => {
                info!("MQTT connected to broker successfully");
                self.client = Some(client);
                Ok(())
            }
            Err(e) => {
                error!("MQTT connect_to_broker failed: {:?}", e);
                Err(BrokerError::HandshakeFailed)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        let client = self.client.as_mut().ok_or(BrokerError::HandshakeFailed)?;
        client.subscribe_to_topic(topic).await.map_err(|e| {
            warn!("MQTT subscribe failed: {:?}", e);
            BrokerError::HandshakeFailed
        })
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let client = self.client.as_mut().ok_or(BrokerError::PublishFailed)?;
        match client
            .send_message(topic, payload, QualityOfService::QoS1, false)
            .await
        {
            Ok(()) => {
                debug!("Message published and acknowledged");
                Ok(())
            }
            Err(e) => {
                error!("Failed to publish message: {:?}", e);
                Err(BrokerError::PublishFailed)
            }
        }
    }

    async fn ping(&mut self) -> Result<(), BrokerError> {
        let client = self.client.as_mut().ok_or(BrokerError::PublishFailed)?;
        client.send_ping().await.map_err(|e| {
            warn!("MQTT ping failed: {:?}", e);
            BrokerError::PublishFailed
        })
    }

    async fn poll(&mut self) -> Result<usize, BrokerError> {
        let client = self.client.as_mut().ok_or(BrokerError::PublishFailed)?;
        let mut drained = 0;
        while drained < MQTT_MAX_DRAIN {
            match with_timeout(MQTT_POLL_TIMEOUT, client.receive_message()).await {
                // nothing waiting
                Err(_) => break,
                Ok(Ok((topic, payload))) => {
                    debug!("Ignoring {} byte(s) on {}", payload.len(), topic);
                    drained += 1;
                }
                Ok(Err(e)) => {
                    warn!("MQTT receive failed: {:?}", e);
                    return Err(BrokerError::PublishFailed);
                }
            }
        }
        Ok(drained)
    }

    fn disconnect(&mut self) {
        // dropping the client closes the socket
        self.client = None;
    }
}
