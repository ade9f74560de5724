use alloc::vec::Vec;

use embassy_time::{Duration, Instant};
use log::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::DeviceConfig;
use crate::constants::{
    ANNOUNCE_TOPIC, ASSOCIATION_RETRY_DELAY, BROKER_RETRY_DELAY, MAX_ASSOCIATION_ATTEMPTS,
    MQTT_KEEPALIVE,
};
use crate::error::{BrokerError, NetworkError, RestartReason};
use crate::identity::DeviceIdentity;

/// Station side of the radio
pub trait NetworkLink {
    /// One association attempt, including the DHCP lease
    async fn associate(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError>;
    fn is_up(&self) -> bool;
}

pub struct SessionOptions<'a> {
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub keepalive: Duration,
}

/// MQTT session over the station link
pub trait BrokerSession {
    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        options: &SessionOptions<'_>,
    ) -> Result<(), BrokerError>;
    fn is_connected(&self) -> bool;
    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError>;
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;
    async fn ping(&mut self) -> Result<(), BrokerError>;
    /// Reads and discards whatever the broker has sent, without waiting for
    /// more. Returns the number of messages drained.
    async fn poll(&mut self) -> Result<usize, BrokerError>;
    /// Drops the session and its socket
    fn disconnect(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Owns the network link and the broker session. Association is bounded by
/// [`MAX_ASSOCIATION_ATTEMPTS`], after which the node restarts; the broker
/// handshake is retried for as long as the link stays up.
pub struct ConnectivityManager<N, B, K> {
    network: N,
    broker: B,
    clock: K,
    identity: DeviceIdentity,
    config: DeviceConfig,
    announcement: Vec<u8>,
    state: ConnectionState,
    subscribed: bool,
    last_activity: Instant,
}

impl<N, B, K> ConnectivityManager<N, B, K>
where
    N: NetworkLink,
    B: BrokerSession,
    K: Clock,
{
    pub fn new(
        network: N,
        broker: B,
        clock: K,
        identity: DeviceIdentity,
        config: DeviceConfig,
        announcement: Vec<u8>,
    ) -> Self {
        let last_activity = clock.now();
        Self {
            network,
            broker,
            clock,
            identity,
            config,
            announcement,
            state: ConnectionState::Disconnected,
            subscribed: false,
            last_activity,
        }
    }

    /// Brings up the link and the broker session. `announcement` is published
    /// to the announce topic every time a session is established.
    pub async fn connect(
        network: N,
        broker: B,
        clock: K,
        identity: DeviceIdentity,
        config: DeviceConfig,
        announcement: Vec<u8>,
    ) -> Result<Self, RestartReason> {
        let mut manager = Self::new(network, broker, clock, identity, config, announcement);
        manager.ensure_connected().await?;
        Ok(manager)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
            && self.network.is_up()
            && self.broker.is_connected()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Blocks until a broker session is up. Only running out of association
    /// attempts ends the wait.
    pub async fn ensure_connected(&mut self) -> Result<(), RestartReason> {
        while !self.is_connected() {
            if self.state != ConnectionState::Disconnected {
                self.drop_session();
            }

            if !self.network.is_up() {
                self.associate()
                    .await
                    .map_err(RestartReason::NetworkUnavailable)?;
            }

            self.state = ConnectionState::Connecting;
            let options = SessionOptions {
                client_id: self.identity.as_str(),
                username: &self.config.broker_username,
                password: &self.config.broker_password,
                keepalive: MQTT_KEEPALIVE,
            };

            match self
                .broker
                .connect(&self.config.broker_host, self.config.broker_port, &options)
                .await
            {
                Ok(()) => self.on_session_established().await,
                Err(e) => {
                    debug!("Broker handshake failed: {:?}, retrying", e);
                    self.state = ConnectionState::Disconnected;
                    self.clock.sleep(BROKER_RETRY_DELAY).await;
                }
            }
        }
        Ok(())
    }

    /// Services the session: link loss detection, inbound drain and
    /// keepalive ping.
    pub async fn tick(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        if !self.network.is_up() || !self.broker.is_connected() {
            warn!("Connection lost");
            self.drop_session();
            return;
        }

        match self.broker.poll().await {
            Ok(0) => {}
            Ok(n) => debug!("Discarded {} inbound message(s)", n),
            Err(e) => {
                warn!("Broker read failed: {:?}", e);
                self.drop_session();
                return;
            }
        }

        let now = self.clock.now();
        if now.duration_since(self.last_activity) >= MQTT_KEEPALIVE / 2 {
            match self.broker.ping().await {
                Ok(()) => self.last_activity = now,
                Err(e) => {
                    warn!("Keepalive ping failed: {:?}", e);
                    self.drop_session();
                }
            }
        }
    }

    pub async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::PublishFailed);
        }

        match self.broker.publish(topic, payload).await {
            Ok(()) => {
                self.last_activity = self.clock.now();
                Ok(())
            }
            Err(e) => {
                self.drop_session();
                Err(e)
            }
        }
    }

    async fn associate(&mut self) -> Result<(), NetworkError> {
        let mut attempt = 1;
        loop {
            info!(
                "Associating with {} (attempt {}/{})",
                self.config.wifi_ssid, attempt, MAX_ASSOCIATION_ATTEMPTS
            );
            match self
                .network
                .associate(&self.config.wifi_ssid, &self.config.wifi_password)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= MAX_ASSOCIATION_ATTEMPTS => {
                    error!("Association failed {} times: {:?}", attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Association failed: {:?}", e);
                    attempt += 1;
                    self.clock.sleep(ASSOCIATION_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn on_session_established(&mut self) {
        info!(
            "Connected to broker {}:{} as {}",
            self.config.broker_host, self.config.broker_port, self.identity
        );
        self.state = ConnectionState::Connected;

        if let Err(e) = self.broker.publish(ANNOUNCE_TOPIC, &self.announcement).await {
            warn!("Capability announcement failed: {:?}", e);
            self.drop_session();
            self.clock.sleep(BROKER_RETRY_DELAY).await;
            return;
        }
        self.last_activity = self.clock.now();

        if !self.subscribed {
            let topic = self.identity.remote_config_topic();
            match self.broker.subscribe(&topic).await {
                Ok(()) => self.subscribed = true,
                Err(e) => warn!("Subscribe to {} failed: {:?}", topic, e),
            }
        }
    }

    fn drop_session(&mut self) {
        self.broker.disconnect();
        self.state = ConnectionState::Disconnected;
        self.subscribed = false;
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;
    use crate::testing::{sample_config, sample_identity, FakeClock, FakeNetwork, RecordingBroker};

    fn manager(
        network: FakeNetwork,
        broker: RecordingBroker,
        clock: FakeClock,
    ) -> ConnectivityManager<FakeNetwork, RecordingBroker, FakeClock> {
        ConnectivityManager::new(
            network,
            broker,
            clock,
            sample_identity(),
            sample_config(),
            b"{\"announce\":1}".to_vec(),
        )
    }

    #[test]
    fn broker_is_retried_until_it_accepts() {
        let clock = FakeClock::new();
        let broker = RecordingBroker::new();
        broker.fail_next_connects(50);
        let mut manager = manager(FakeNetwork::new(), broker.clone(), clock.clone());

        block_on(manager.ensure_connected()).unwrap();

        assert!(manager.is_connected());
        assert_eq!(broker.connect_attempts(), 51);
        assert_eq!(clock.elapsed(), BROKER_RETRY_DELAY * 50);
    }

    #[test]
    fn association_is_bounded() {
        let clock = FakeClock::new();
        let network = FakeNetwork::new();
        network.fail_next_associations(u32::MAX);
        let broker = RecordingBroker::new();
        let mut manager = manager(network.clone(), broker.clone(), clock.clone());

        let result = block_on(manager.ensure_connected());

        assert_eq!(
            result,
            Err(RestartReason::NetworkUnavailable(NetworkError::AssociationFailed))
        );
        assert_eq!(network.attempts(), MAX_ASSOCIATION_ATTEMPTS as u32);
        assert_eq!(
            clock.elapsed(),
            ASSOCIATION_RETRY_DELAY * (MAX_ASSOCIATION_ATTEMPTS as u32 - 1)
        );
        assert_eq!(broker.connect_attempts(), 0);
    }

    #[test]
    fn association_recovers_within_budget() {
        let network = FakeNetwork::new();
        network.fail_next_associations(MAX_ASSOCIATION_ATTEMPTS as u32 - 1);
        let mut manager = manager(network.clone(), RecordingBroker::new(), FakeClock::new());

        block_on(manager.ensure_connected()).unwrap();
        assert_eq!(network.attempts(), MAX_ASSOCIATION_ATTEMPTS as u32);
    }

    #[test]
    fn each_session_subscribes_and_announces_once() {
        let broker = RecordingBroker::new();
        let mut manager = manager(FakeNetwork::new(), broker.clone(), FakeClock::new());

        block_on(manager.ensure_connected()).unwrap();
        block_on(manager.ensure_connected()).unwrap();
        assert_eq!(broker.subscriptions(), ["sensors/config/24:0A:C4:12:34:FF"]);
        assert_eq!(broker.published_to(ANNOUNCE_TOPIC).len(), 1);

        broker.drop_connection();
        block_on(manager.ensure_connected()).unwrap();
        assert_eq!(broker.subscriptions().len(), 2);
        assert_eq!(broker.published_to(ANNOUNCE_TOPIC).len(), 2);
    }

    #[test]
    fn client_id_is_the_device_mac() {
        let broker = RecordingBroker::new();
        let mut manager = manager(FakeNetwork::new(), broker.clone(), FakeClock::new());
        block_on(manager.ensure_connected()).unwrap();
        assert_eq!(broker.last_client_id().as_deref(), Some("24:0A:C4:12:34:FF"));
    }

    #[test]
    fn link_loss_goes_back_to_association() {
        let network = FakeNetwork::new();
        let mut manager = manager(network.clone(), RecordingBroker::new(), FakeClock::new());
        block_on(manager.ensure_connected()).unwrap();
        assert_eq!(network.attempts(), 1);

        network.drop_link();
        block_on(manager.tick());
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        block_on(manager.ensure_connected()).unwrap();
        assert_eq!(network.attempts(), 2);
    }

    #[test]
    fn tick_pings_after_half_the_keepalive() {
        let clock = FakeClock::new();
        let broker = RecordingBroker::new();
        let mut manager = manager(FakeNetwork::new(), broker.clone(), clock.clone());
        block_on(manager.ensure_connected()).unwrap();

        clock.advance(MQTT_KEEPALIVE / 2 - Duration::from_secs(1));
        block_on(manager.tick());
        assert_eq!(broker.pings(), 0);

        clock.advance(Duration::from_secs(1));
        block_on(manager.tick());
        assert_eq!(broker.pings(), 1);
        assert!(manager.is_connected());
    }

    #[test]
    fn failed_ping_marks_the_session_down() {
        let clock = FakeClock::new();
        let broker = RecordingBroker::new();
        let mut manager = manager(FakeNetwork::new(), broker.clone(), clock.clone());
        block_on(manager.ensure_connected()).unwrap();

        broker.fail_pings(true);
        clock.advance(MQTT_KEEPALIVE);
        block_on(manager.tick());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn publish_requires_a_session() {
        let broker = RecordingBroker::new();
        let mut manager = manager(FakeNetwork::new(), broker.clone(), FakeClock::new());

        assert_eq!(
            block_on(manager.publish("/t", b"x")),
            Err(BrokerError::PublishFailed)
        );
        assert!(broker.published_to("/t").is_empty());

        block_on(manager.ensure_connected()).unwrap();
        block_on(manager.publish("/t", b"x")).unwrap();
        assert_eq!(broker.published_to("/t"), [b"x".to_vec()]);
    }

    #[test]
    fn failed_announcement_is_sent_again_on_the_next_session() {
        let clock = FakeClock::new();
        let broker = RecordingBroker::new();
        broker.fail_next_publishes(1);
        let mut manager = manager(FakeNetwork::new(), broker.clone(), clock.clone());

        block_on(manager.ensure_connected()).unwrap();
        assert!(manager.is_connected());
        assert_eq!(broker.connect_attempts(), 2);
        assert_eq!(broker.published_to(ANNOUNCE_TOPIC), [b"{\"announce\":1}".to_vec()]);
        assert_eq!(clock.elapsed(), BROKER_RETRY_DELAY);
    }

    #[test]
    fn announcement_goes_out_before_the_subscription() {
        let broker = RecordingBroker::new();
        let mut manager = manager(FakeNetwork::new(), broker.clone(), FakeClock::new());
        block_on(manager.ensure_connected()).unwrap();
        assert_eq!(broker.subscribed_after_publishes(), Some(1));
    }

    #[test]
    fn tick_drains_inbound_messages_before_the_next_publish() {
        let broker = RecordingBroker::new();
        let mut manager = manager(FakeNetwork::new(), broker.clone(), FakeClock::new());
        block_on(manager.ensure_connected()).unwrap();

        broker.deliver(2);
        block_on(manager.tick());
        assert_eq!(broker.drained(), 2);
        assert!(manager.is_connected());

        block_on(manager.publish("/t", b"x")).unwrap();
        assert_eq!(broker.published_to("/t"), [b"x".to_vec()]);
    }

    #[test]
    fn failed_drain_marks_the_session_down() {
        let broker = RecordingBroker::new();
        let mut manager = manager(FakeNetwork::new(), broker.clone(), FakeClock::new());
        block_on(manager.ensure_connected()).unwrap();

        broker.fail_polls(true);
        block_on(manager.tick());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
