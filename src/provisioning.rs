use core::pin::pin;

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant};
use embedded_storage::nor_flash::NorFlash;
use log::{error, info, warn};

use crate::clock::Clock;
use crate::config::{DeviceConfig, FieldError};
use crate::connectivity::NetworkLink;
use crate::constants::RESTART_DELAY;
use crate::error::{ConfigError, RestartReason};
use crate::identity::DeviceIdentity;
use crate::portal::{AccessPoint, CaptivePortal, PortalForm, PortalOutcome, PortalSubmission};
use crate::reset_intent::{BootMarker, ResetIntentDetector};
use crate::storage::ConfigStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
    Operational(DeviceConfig),
    Restart(RestartReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitError {
    Invalid(FieldError),
    Storage(ConfigError),
}

/// Boot-time choice between provisioning and normal operation.
///
/// The node provisions when no usable configuration is stored or when the
/// operator double-resets it. Every dead end is reported as a
/// [`RestartReason`]; the caller performs the reset.
pub struct ProvisioningController<F, M> {
    store: ConfigStore<F>,
    detector: ResetIntentDetector<M>,
    identity: DeviceIdentity,
    portal_password: &'static str,
    portal_timeout: Duration,
}

impl<F: NorFlash, M: BootMarker> ProvisioningController<F, M> {
    pub fn new(
        store: ConfigStore<F>,
        detector: ResetIntentDetector<M>,
        identity: DeviceIdentity,
        portal_password: &'static str,
        portal_timeout: Duration,
    ) -> Self {
        Self {
            store,
            detector,
            identity,
            portal_password,
            portal_timeout,
        }
    }

    /// Decides how this boot proceeds. A requested restart leaves the reset
    /// marker cleared, so it is not mistaken for an operator double reset.
    pub async fn boot<P, N, K>(&mut self, portal: &mut P, network: &mut N, clock: &K) -> BootOutcome
    where
        P: CaptivePortal,
        N: NetworkLink,
        K: Clock,
    {
        let outcome = self.decide(portal, network, clock).await;
        if let BootOutcome::Restart(_) = outcome {
            self.detector.stop();
        }
        outcome
    }

    /// Hands the detector back once boot is decided, to close the window
    pub fn into_detector(self) -> ResetIntentDetector<M> {
        self.detector
    }

    async fn decide<P, N, K>(&mut self, portal: &mut P, network: &mut N, clock: &K) -> BootOutcome
    where
        P: CaptivePortal,
        N: NetworkLink,
        K: Clock,
    {
        let booted = clock.now();
        let double_reset = self.detector.note_boot();
        let prior = match self.store.load() {
            Ok(config) if !double_reset => return BootOutcome::Operational(config),
            Ok(config) => {
                info!("Reprovisioning requested by double reset");
                self.detector.stop();
                Some(config)
            }
            Err(e) => {
                info!("No usable configuration ({:?}), provisioning", e);
                if double_reset {
                    self.detector.stop();
                }
                None
            }
        };

        let access_point = AccessPoint {
            ssid: self.identity.portal_ssid(),
            password: self.portal_password,
        };
        let window = self.detector.window();

        // the portal may outlive the reset window, which must still close on time
        let mut joining = pin!(provision_and_join(
            &mut self.store,
            access_point,
            self.portal_timeout,
            prior.as_ref(),
            portal,
            network,
            clock,
        ));
        let window_closes = async {
            let elapsed = clock.now().duration_since(booted);
            if elapsed < window {
                clock.sleep(window - elapsed).await;
            }
        };

        let outcome = match select(joining.as_mut(), window_closes).await {
            Either::First(outcome) => outcome,
            Either::Second(()) => {
                self.detector.stop();
                joining.await
            }
        };

        self.detector.expire(clock.now().duration_since(booted));
        outcome
    }

    /// Merges `submission` over `prior`, validates and stores the result.
    pub fn commit(
        &mut self,
        prior: Option<&DeviceConfig>,
        submission: &PortalSubmission,
    ) -> Result<DeviceConfig, CommitError> {
        commit(&mut self.store, prior, submission)
    }
}

fn commit<F: NorFlash>(
    store: &mut ConfigStore<F>,
    prior: Option<&DeviceConfig>,
    submission: &PortalSubmission,
) -> Result<DeviceConfig, CommitError> {
    let config = submission.merge(prior).map_err(CommitError::Invalid)?;
    store.save(&config).map_err(CommitError::Storage)?;
    Ok(config)
}

/// Runs the portal until a configuration is committed, then associates once
/// with the new credentials.
async fn provision_and_join<F, P, N, K>(
    store: &mut ConfigStore<F>,
    access_point: AccessPoint,
    portal_timeout: Duration,
    prior: Option<&DeviceConfig>,
    portal: &mut P,
    network: &mut N,
    clock: &K,
) -> BootOutcome
where
    F: NorFlash,
    P: CaptivePortal,
    N: NetworkLink,
    K: Clock,
{
    let deadline = clock.now() + portal_timeout;
    let config = match provision(store, &access_point, deadline, prior, portal, clock).await {
        Ok(config) => config,
        Err(reason) => return BootOutcome::Restart(reason),
    };

    match network
        .associate(&config.wifi_ssid, &config.wifi_password)
        .await
    {
        Ok(()) => BootOutcome::Operational(config),
        Err(e) => {
            error!("Failed to connect with the new credentials: {:?}", e);
            clock.sleep(RESTART_DELAY).await;
            BootOutcome::Restart(RestartReason::ProvisioningNetworkFailed(e))
        }
    }
}

async fn provision<F: NorFlash, P: CaptivePortal, K: Clock>(
    store: &mut ConfigStore<F>,
    access_point: &AccessPoint,
    deadline: Instant,
    prior: Option<&DeviceConfig>,
    portal: &mut P,
    clock: &K,
) -> Result<DeviceConfig, RestartReason> {
    let mut form = PortalForm::prefill(prior);

    loop {
        let now = clock.now();
        if now >= deadline {
            warn!("Provisioning portal timed out");
            return Err(RestartReason::PortalTimeout);
        }

        info!("Portal open on {}", access_point.ssid);
        match portal
            .run(access_point, &form, deadline.duration_since(now))
            .await
        {
            PortalOutcome::TimedOut => {
                warn!("Provisioning portal timed out");
                return Err(RestartReason::PortalTimeout);
            }
            PortalOutcome::Submitted(submission) => match commit(store, prior, &submission) {
                Ok(config) => {
                    info!("Configuration saved");
                    return Ok(config);
                }
                Err(CommitError::Invalid(e)) => {
                    warn!("Submission rejected: {:?}", e);
                    form.error = Some(e);
                }
                Err(CommitError::Storage(e)) => {
                    error!("Failed to save configuration: {:?}", e);
                    return Err(RestartReason::ConfigCommitFailed(e));
                }
            },
        }
    }
}
