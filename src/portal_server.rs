use core::fmt::Debug;
use core::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use core::pin::pin;

use alloc::string::String;

use edge_http::io::server::{Connection, Handler, Server};
use edge_http::io::Error as HttpError;
use edge_http::Method;
use edge_nal::{TcpBind, UdpBind};
use edge_nal_embassy::{Tcp, TcpBuffers, Udp, UdpBuffers};
use embassy_futures::join::join3;
use embassy_futures::select::{select, Either};
use embassy_net::Stack;
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, signal::Signal};
use embassy_time::{with_timeout, Duration, Timer};
use embedded_io_async::{Read, Write};
use esp_radio::wifi::{AccessPointConfig, AuthMethod, ModeConfig};
use log::{debug, error, info, warn};

use crate::portal::{AccessPoint, CaptivePortal, PortalForm, PortalOutcome, PortalSubmission};
use crate::wifi::{Radio, SharedController, GATEWAY};

const HTTP_PORT: u16 = 80;
const DNS_PORT: u16 = 53;
const MAX_BODY_LEN: usize = 1024;
// keeps the servers up long enough to deliver the confirmation page
const LINGER: Duration = Duration::from_secs(1);

const CAPTIVE_PATHS: &[&str] = &["/generate_204", "/gen_204", "/ncsi.txt", "/connecttest.txt"];

const APPLYING_HTML: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width,initial-scale=1\"><title>Applying</title></head>\
<body><h1>Applying configuration</h1><p>If the settings are valid the sensor joins your network. \
Otherwise the form comes back with the problem highlighted.</p></body></html>";

/// Soft access point serving the provisioning form, with DHCP and a DNS
/// responder that points every name at the node.
pub struct Portal {
    controller: &'static SharedController,
    stack: Stack<'static>,
}

impl Portal {
    pub fn new(radio: &Radio) -> Self {
        Self {
            controller: radio.controller,
            stack: radio.ap_stack,
        }
    }

    async fn start(&self, access_point: &AccessPoint) -> Result<(), esp_radio::wifi::WifiError> {
        let mut controller = self.controller.lock().await;

        if matches!(controller.is_started(), Ok(true)) {
            controller.stop_async().await?;
        }

        let auth_method = if access_point.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::Wpa2Personal
        };
        let config = AccessPointConfig::default()
            .with_ssid(access_point.ssid.as_str().into())
            .with_password(access_point.password.into())
            .with_auth_method(auth_method);
        controller.set_config(&ModeConfig::AccessPoint(config))?;
        controller.start_async().await?;

        info!("Provisioning portal up on {} as {}", GATEWAY, access_point.ssid);
        Ok(())
    }

    async fn stop(&self) {
        let mut controller = self.controller.lock().await;
        if let Err(e) = controller.stop_async().await {
            warn!("Failed to stop access point: {:?}", e);
        }
    }
}

impl CaptivePortal for Portal {
    async fn run(
        &mut self,
        access_point: &AccessPoint,
        form: &PortalForm,
        timeout: Duration,
    ) -> PortalOutcome {
        let mut page = String::new();
        if form.render(&mut page).is_err() {
            error!("Failed to render provisioning form");
            return PortalOutcome::TimedOut;
        }

        if let Err(e) = self.start(access_point).await {
            error!("Failed to start access point: {:?}", e);
            return PortalOutcome::TimedOut;
        }

        let submitted = Signal::<NoopRawMutex, PortalSubmission>::new();
        let handler = FormHandler {
            page: &page,
            submitted: &submitted,
        };

        let mut servers = pin!(join3(
            serve_http(self.stack, &handler),
            serve_dhcp(self.stack),
            serve_dns(self.stack),
        ));

        let outcome = match select(servers.as_mut(), with_timeout(timeout, submitted.wait())).await {
            Either::Second(Ok(submission)) => {
                select(servers.as_mut(), Timer::after(LINGER)).await;
                PortalOutcome::Submitted(submission)
            }
            Either::Second(Err(_)) => {
                info!("Provisioning portal timed out");
                PortalOutcome::TimedOut
            }
            Either::First(_) => PortalOutcome::TimedOut,
        };

        self.stop().await;
        outcome
    }
}

struct FormHandler<'a> {
    page: &'a str,
    submitted: &'a Signal<NoopRawMutex, PortalSubmission>,
}

impl Handler for FormHandler<'_> {
    type Error<E>
        = HttpError<E>
    where
        E: Debug;

    async fn handle<T, const N: usize>(
        &self,
        _task_id: impl core::fmt::Display + Copy,
        conn: &mut Connection<'_, T, N>,
    ) -> Result<(), Self::Error<T::Error>>
    where
        T: Read + Write,
    {
        let headers = conn.headers()?;
        let method = headers.method;
        let path = headers.path;
        debug!("HTTP {:?} {}", method, path);

        if CAPTIVE_PATHS.contains(&path) {
            conn.initiate_response(302, Some("Found"), &[("Location", "/")])
                .await?;
            return Ok(());
        }

        match (method, path) {
            (Method::Get, "/") => {
                html(conn, self.page).await?;
            }
            (Method::Post, "/save") => {
                let mut body = heapless::Vec::<u8, MAX_BODY_LEN>::new();
                let mut buf = [0u8; 256];
                loop {
                    let n = conn.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    if body.extend_from_slice(&buf[..n]).is_err() {
                        conn.initiate_response(413, Some("Payload Too Large"), &[])
                            .await?;
                        return Ok(());
                    }
                }

                match PortalSubmission::parse(&body) {
                    Ok(submission) => {
                        info!("Provisioning form submitted");
                        self.submitted.signal(submission);
                        html(conn, APPLYING_HTML).await?;
                    }
                    Err(e) => {
                        warn!("Rejected form body: {:?}", e);
                        conn.initiate_response(400, Some("Bad Request"), &[])
                            .await?;
                    }
                }
            }
            // every other page leads back to the form
            _ => {
                conn.initiate_response(302, Some("Found"), &[("Location", "/")])
                    .await?;
            }
        }

        Ok(())
    }
}

async fn html<T, const N: usize>(
    conn: &mut Connection<'_, T, N>,
    body: &str,
) -> Result<(), HttpError<T::Error>>
where
    T: Read + Write,
{
    conn.initiate_response(
        200,
        Some("OK"),
        &[("Content-Type", "text/html; charset=utf-8")],
    )
    .await?;
    conn.write_all(body.as_bytes()).await
}

async fn serve_http(stack: Stack<'static>, handler: &FormHandler<'_>) {
    let buffers = TcpBuffers::<2, 1024, 1024>::new();
    let tcp = Tcp::new(stack, &buffers);
    let any = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), HTTP_PORT);

    let mut server = Server::<2, 2048, 32>::new();

    loop {
        match tcp.bind(any).await {
            Ok(mut acceptor) => {
                if let Err(e) = server.run(Some(50000), &mut acceptor, handler).await {
                    error!("HTTP server error: {:?}", e);
                }
            }
            Err(e) => error!("Failed to bind HTTP socket: {:?}", e),
        }
        Timer::after(Duration::from_millis(100)).await;
    }
}

async fn serve_dhcp(stack: Stack<'static>) {
    use edge_dhcp::{
        io::{self, DEFAULT_SERVER_PORT},
        server::{Server, ServerOptions},
    };

    let mut buf = [0u8; 1500];
    let mut gw_buf = [Ipv4Addr::UNSPECIFIED];

    let buffers = UdpBuffers::<1, 1024, 1024, 10>::new();
    let udp = Udp::new(stack, &buffers);
    let any = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_SERVER_PORT));

    loop {
        match udp.bind(any).await {
            Ok(mut socket) => {
                _ = io::server::run(
                    &mut Server::<_, 64>::new_with_et(GATEWAY),
                    &ServerOptions::new(GATEWAY, Some(&mut gw_buf)),
                    &mut socket,
                    &mut buf,
                )
                .await
                .inspect_err(|e| warn!("DHCP server error: {e:?}"));
            }
            Err(e) => error!("Failed to bind DHCP socket: {:?}", e),
        }
        Timer::after(Duration::from_millis(500)).await;
    }
}

async fn serve_dns(stack: Stack<'static>) {
    let mut tx_buf = [0u8; 1500];
    let mut rx_buf = [0u8; 1500];

    let buffers = UdpBuffers::<1, 1024, 1024, 10>::new();
    let udp = Udp::new(stack, &buffers);
    let any = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DNS_PORT));

    loop {
        _ = edge_captive::io::run(
            &udp,
            any,
            &mut tx_buf,
            &mut rx_buf,
            GATEWAY,
            core::time::Duration::from_secs(60),
        )
        .await
        .inspect_err(|e| warn!("Captive DNS server error: {e:?}"));
        Timer::after(Duration::from_millis(500)).await;
    }
}
