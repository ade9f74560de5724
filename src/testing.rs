use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::string::{String as StdString, ToString};
use std::vec::Vec;

use core::fmt::Write;

use embassy_time::{Duration, Instant};
use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
};
use heapless::String;

use crate::clock::Clock;
use crate::config::{Capabilities, Capability, DeviceConfig};
use crate::connectivity::{BrokerSession, NetworkLink, SessionOptions};
use crate::error::{BrokerError, NetworkError, SensorError};
use crate::identity::DeviceIdentity;
use crate::portal::{
    AccessPoint, CaptivePortal, PortalForm, PortalOutcome, PortalSubmission, RawValue,
};
use crate::reset_intent::BootMarker;
use crate::sensors::{ClimateReading, Co2Reading, SensorAdapter, SoundLevel};

pub fn sample_identity() -> DeviceIdentity {
    DeviceIdentity::from_mac([0x24, 0x0a, 0xc4, 0x12, 0x34, 0xff])
}

pub fn sample_config() -> DeviceConfig {
    DeviceConfig {
        wifi_ssid: String::try_from("HomeNet").unwrap(),
        wifi_password: String::try_from("s3cr3t-pass").unwrap(),
        broker_host: String::try_from("192.168.1.10").unwrap(),
        broker_port: 1883,
        broker_username: String::try_from("admin").unwrap(),
        broker_password: String::try_from("il19").unwrap(),
        room: String::try_from("Living room").unwrap(),
        sensor_name: String::try_from("node-1").unwrap(),
        capabilities: Capabilities::CLIMATE,
    }
}

/// A full form submission carrying every value of `config`
pub fn submission_for(config: &DeviceConfig) -> PortalSubmission {
    let text = |value: &str| Some(String::try_from(value).unwrap());
    let mut port: RawValue = String::new();
    write!(port, "{}", config.broker_port).unwrap();

    PortalSubmission {
        wifi_ssid: text(&config.wifi_ssid),
        wifi_pass: text(&config.wifi_password),
        mqtt_server: text(&config.broker_host),
        mqtt_port: Some(port),
        mqtt_user: text(&config.broker_username),
        mqtt_pass: text(&config.broker_password),
        room_name: text(&config.room),
        sensor_name: text(&config.sensor_name),
        has_temp: config.capabilities.has(Capability::Climate),
        has_co2: config.capabilities.has(Capability::Co2),
        has_mic: config.capabilities.has(Capability::Microphone),
    }
}

/// NOR flash in RAM. Clones share the same contents, so a test can keep a
/// handle while the store owns another.
#[derive(Clone)]
pub struct MemFlash {
    state: Rc<RefCell<FlashState>>,
}

struct FlashState {
    data: Vec<u8>,
    fail_reads: bool,
    fail_writes: bool,
    /// Bytes still written before the simulated power loss
    write_budget: Option<usize>,
}

impl MemFlash {
    pub const CAPACITY: usize = 0x10000;

    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(FlashState {
                data: vec![0xFF; Self::CAPACITY],
                fail_reads: false,
                fail_writes: false,
                write_budget: None,
            })),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.borrow_mut().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.borrow_mut().fail_writes = fail;
    }

    /// Power is lost after `bytes` more bytes have been programmed
    pub fn tear_after(&self, bytes: usize) {
        self.state.borrow_mut().write_budget = Some(bytes);
    }

    pub fn corrupt(&self, offset: u32) {
        self.state.borrow_mut().data[offset as usize] ^= 0x5A;
    }

    pub fn bytes(&self, offset: u32, len: usize) -> Vec<u8> {
        let offset = offset as usize;
        self.state.borrow().data[offset..offset + len].to_vec()
    }
}

impl ErrorType for MemFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MemFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let state = self.state.borrow();
        if state.fail_reads {
            return Err(NorFlashErrorKind::Other);
        }
        let offset = offset as usize;
        bytes.copy_from_slice(&state.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        Self::CAPACITY
    }
}

impl NorFlash for MemFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(NorFlashErrorKind::Other);
        }
        state.data[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(NorFlashErrorKind::Other);
        }

        let budget = state.write_budget;
        let (count, torn) = match budget {
            Some(budget) if budget < bytes.len() => (budget, true),
            Some(budget) => {
                state.write_budget = Some(budget - bytes.len());
                (bytes.len(), false)
            }
            None => (bytes.len(), false),
        };
        if torn {
            state.write_budget = Some(0);
        }

        let offset = offset as usize;
        for (cell, byte) in state.data[offset..offset + count].iter_mut().zip(bytes) {
            // programming only clears bits
            *cell &= *byte;
        }

        if torn {
            Err(NorFlashErrorKind::Other)
        } else {
            Ok(())
        }
    }
}

/// Marker word shared between simulated boots
#[derive(Clone)]
pub struct FakeMarker {
    value: Rc<Cell<u32>>,
}

impl FakeMarker {
    /// Memory content after power-on
    pub fn cold(garbage: u32) -> Self {
        Self {
            value: Rc::new(Cell::new(garbage)),
        }
    }

    pub fn set(&self, value: u32) {
        self.value.set(value);
    }

    pub fn value(&self) -> u32 {
        self.value.get()
    }
}

impl BootMarker for FakeMarker {
    fn read(&self) -> u32 {
        self.value.get()
    }

    fn write(&mut self, value: u32) {
        self.value.set(value);
    }
}

/// Clock that only moves when slept on or advanced
#[derive(Clone, Default)]
pub struct FakeClock {
    ticks: Rc<Cell<u64>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.ticks.set(self.ticks.get() + duration.as_ticks());
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_ticks(self.ticks.get())
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.ticks.get())
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Clone, Default)]
pub struct FakeNetwork {
    state: Rc<RefCell<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    up: bool,
    attempts: u32,
    failures_left: u32,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_associations(&self, count: u32) {
        self.state.borrow_mut().failures_left = count;
    }

    pub fn drop_link(&self) {
        self.state.borrow_mut().up = false;
    }

    pub fn attempts(&self) -> u32 {
        self.state.borrow().attempts
    }
}

impl NetworkLink for FakeNetwork {
    async fn associate(&mut self, _ssid: &str, _password: &str) -> Result<(), NetworkError> {
        let mut state = self.state.borrow_mut();
        state.attempts += 1;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(NetworkError::AssociationFailed);
        }
        state.up = true;
        Ok(())
    }

    fn is_up(&self) -> bool {
        self.state.borrow().up
    }
}

/// Broker double recording every packet it accepts
#[derive(Clone, Default)]
pub struct RecordingBroker {
    state: Rc<RefCell<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    connected: bool,
    connect_attempts: u32,
    connect_failures_left: u32,
    fail_publishes: bool,
    publish_failures_left: u32,
    fail_pings: bool,
    fail_polls: bool,
    pings: u32,
    inbound: usize,
    drained: usize,
    first_subscribe_after: Option<usize>,
    last_client_id: Option<StdString>,
    subscriptions: Vec<StdString>,
    published: Vec<(StdString, Vec<u8>)>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.state.borrow_mut().connect_failures_left = count;
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state.borrow_mut().fail_publishes = fail;
    }

    pub fn fail_next_publishes(&self, count: u32) {
        self.state.borrow_mut().publish_failures_left = count;
    }

    pub fn fail_pings(&self, fail: bool) {
        self.state.borrow_mut().fail_pings = fail;
    }

    pub fn fail_polls(&self, fail: bool) {
        self.state.borrow_mut().fail_polls = fail;
    }

    /// Queues `count` messages from the broker on the open session
    pub fn deliver(&self, count: usize) {
        self.state.borrow_mut().inbound += count;
    }

    pub fn drained(&self) -> usize {
        self.state.borrow().drained
    }

    /// How many publishes had succeeded when the first subscribe came in
    pub fn subscribed_after_publishes(&self) -> Option<usize> {
        self.state.borrow().first_subscribe_after
    }

    /// The broker side closes the connection
    pub fn drop_connection(&self) {
        self.state.borrow_mut().connected = false;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.borrow().connect_attempts
    }

    pub fn pings(&self) -> u32 {
        self.state.borrow().pings
    }

    pub fn last_client_id(&self) -> Option<StdString> {
        self.state.borrow().last_client_id.clone()
    }

    pub fn subscriptions(&self) -> Vec<StdString> {
        self.state.borrow().subscriptions.clone()
    }

    pub fn topics(&self) -> Vec<StdString> {
        self.state
            .borrow()
            .published
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state
            .borrow()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl BrokerSession for RecordingBroker {
    async fn connect(
        &mut self,
        _host: &str,
        _port: u16,
        options: &SessionOptions<'_>,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.borrow_mut();
        state.connect_attempts += 1;
        if state.connect_failures_left > 0 {
            state.connect_failures_left -= 1;
            return Err(BrokerError::HandshakeFailed);
        }
        state.connected = true;
        state.inbound = 0;
        state.last_client_id = Some(options.client_id.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        let mut state = self.state.borrow_mut();
        if state.first_subscribe_after.is_none() {
            state.first_subscribe_after = Some(state.published.len());
        }
        state.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let mut state = self.state.borrow_mut();
        if state.publish_failures_left > 0 {
            state.publish_failures_left -= 1;
            return Err(BrokerError::PublishFailed);
        }
        // an unread inbound packet arrives where the PUBACK is expected
        if state.fail_publishes || !state.connected || state.inbound > 0 {
            return Err(BrokerError::PublishFailed);
        }
        state.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), BrokerError> {
        let mut state = self.state.borrow_mut();
        if state.fail_pings {
            return Err(BrokerError::PublishFailed);
        }
        state.pings += 1;
        Ok(())
    }

    async fn poll(&mut self) -> Result<usize, BrokerError> {
        let mut state = self.state.borrow_mut();
        if state.fail_polls {
            return Err(BrokerError::PublishFailed);
        }
        let drained = core::mem::take(&mut state.inbound);
        state.drained += drained;
        Ok(drained)
    }

    fn disconnect(&mut self) {
        self.state.borrow_mut().connected = false;
    }
}

enum PortalStep {
    Submit(PortalSubmission),
    TimeOut,
}

/// Portal replaying scripted operator actions. An exhausted script times out.
pub struct ScriptedPortal {
    clock: FakeClock,
    script: VecDeque<PortalStep>,
    runs: Vec<(String<32>, PortalForm, Duration)>,
}

impl ScriptedPortal {
    /// Time the operator takes to fill in the form
    pub const SUBMIT_DELAY: Duration = Duration::from_secs(10);

    pub fn new(clock: FakeClock) -> Self {
        Self {
            clock,
            script: VecDeque::new(),
            runs: Vec::new(),
        }
    }

    pub fn submit(&mut self, submission: PortalSubmission) {
        self.script.push_back(PortalStep::Submit(submission));
    }

    pub fn time_out(&mut self) {
        self.script.push_back(PortalStep::TimeOut);
    }

    pub fn runs(&self) -> usize {
        self.runs.len()
    }

    pub fn last_run(&self) -> Option<(String<32>, PortalForm, Duration)> {
        self.runs.last().cloned()
    }
}

impl CaptivePortal for ScriptedPortal {
    async fn run(
        &mut self,
        access_point: &AccessPoint,
        form: &PortalForm,
        timeout: Duration,
    ) -> PortalOutcome {
        self.runs
            .push((access_point.ssid.clone(), form.clone(), timeout));
        match self.script.pop_front() {
            Some(PortalStep::Submit(submission)) => {
                self.clock.advance(Self::SUBMIT_DELAY);
                PortalOutcome::Submitted(submission)
            }
            Some(PortalStep::TimeOut) | None => {
                self.clock.advance(timeout);
                PortalOutcome::TimedOut
            }
        }
    }
}

pub struct FakeClimate {
    fail: bool,
}

impl FakeClimate {
    pub fn new() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl SensorAdapter for FakeClimate {
    type Reading = ClimateReading;

    async fn read(&mut self) -> Result<ClimateReading, SensorError> {
        if self.fail {
            return Err(SensorError::ReadFailed);
        }
        Ok(ClimateReading {
            temperature: 21.5,
            pressure: 101_325.0,
            humidity: 40.0,
        })
    }
}

pub struct FakeCo2 {
    ppm: u16,
}

impl FakeCo2 {
    pub fn new(ppm: u16) -> Self {
        Self { ppm }
    }
}

impl SensorAdapter for FakeCo2 {
    type Reading = Co2Reading;

    async fn read(&mut self) -> Result<Co2Reading, SensorError> {
        Ok(Co2Reading { co2_ppm: self.ppm })
    }
}

/// Yields 1, 2, 3, ... so ring order is observable
pub struct FakeMicrophone {
    last: u16,
}

impl FakeMicrophone {
    pub fn new() -> Self {
        Self { last: 0 }
    }
}

impl SensorAdapter for FakeMicrophone {
    type Reading = SoundLevel;

    async fn read(&mut self) -> Result<SoundLevel, SensorError> {
        self.last += 1;
        Ok(SoundLevel(self.last))
    }
}
