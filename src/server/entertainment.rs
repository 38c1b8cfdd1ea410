use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_openssl::SslStream;
use udp_stream::UdpStream;

use hue::stream::{
    HueStreamDeviceType, HueStreamLightsV1, HueStreamLightsV2, HueStreamPacket,
};
use hue::xy::XY;

use crate::config::AppConfig;
use crate::emitter::esphome::EsphomeAccumulator;
use crate::emitter::fallback::FallbackRoundRobin;
use crate::emitter::lifx::LifxAccumulator;
use crate::emitter::wled::WledAccumulator;
use crate::emitter::yeelight::YeelightSample;
use crate::emitter::{Emitters, FrameBuckets, mqtt};
use crate::error::{ApiError, ApiResult};
use crate::model::framediff::{FrameDecision, FrameDiffGate, Tolerances};
use crate::model::profile::{ProfileSettings, ResourceProfile};
use crate::resource::{
    BackendRequest, DeviceConfig, DeviceProtocol, EntertainmentGroup, HueDeviceConfig, Light,
    LightMode, Resources,
};
use crate::server::dtls::{self, DtlsServer};
use crate::server::service::Service;
use crate::server::splitter::{SplitterTarget, StreamSplitter};
use crate::upstream::UpstreamBridge;
use crate::upstream::uuid_map::UuidMapper;

/// Consecutive unparseable frames before the session aborts
const MAX_INVALID_FRAMES: u32 = 10;

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

const FPS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Routing tables derived from the entertainment group at session
/// start. Never rebuilt mid-session; channel order is stable.
pub struct Routes {
    /// v2 channel index -> (light, segment index)
    pub channels: Vec<(Arc<Light>, u8)>,
    /// v1 wire light id -> light
    pub v1: HashMap<u16, Arc<Light>>,
    /// validated per-protocol config per member light
    pub configs: HashMap<u32, DeviceConfig>,
    /// member lights living on an upstream hue bridge, channel order
    pub upstream: Vec<(Arc<Light>, HueDeviceConfig)>,
    /// compacted diy channel index -> upstream channel index
    pub channel_map: BTreeMap<u8, u8>,
    /// members without any udp-friendly path
    pub fallback_lights: Vec<Arc<Light>>,
    /// all distinct member lights, channel order
    pub members: Vec<Arc<Light>>,
}

impl Routes {
    pub fn build(group: &EntertainmentGroup, res: &Resources) -> ApiResult<Self> {
        let mut channels = Vec::with_capacity(group.channels.len());
        let mut occurrences: HashMap<u32, u8> = HashMap::new();
        let mut configs = HashMap::new();
        let mut v1 = HashMap::new();
        let mut members: Vec<Arc<Light>> = Vec::new();

        for id in &group.channels {
            let light = res.light(*id)?;

            let counter = occurrences.entry(*id).or_insert(0);
            let segment = *counter;
            *counter += 1;

            if !configs.contains_key(id) {
                configs.insert(*id, DeviceConfig::from_value(&light)?);
                if let Ok(wire_id) = u16::try_from(*id) {
                    v1.insert(wire_id, light.clone());
                }
                members.push(light.clone());
            }

            channels.push((light, segment));
        }

        let mut channel_map = BTreeMap::new();
        let mut next_upstream = 0u8;
        for (idx, (light, _)) in channels.iter().enumerate() {
            if light.protocol == DeviceProtocol::Hue {
                if let Ok(idx) = u8::try_from(idx) {
                    channel_map.insert(idx, next_upstream);
                    next_upstream += 1;
                }
            }
        }

        let upstream = members
            .iter()
            .filter_map(|light| match configs.get(&light.id_v1) {
                Some(DeviceConfig::Hue(cfg)) => Some((light.clone(), cfg.clone())),
                _ => None,
            })
            .collect();

        let fallback_lights = members
            .iter()
            .filter(|light| light.protocol == DeviceProtocol::Other)
            .cloned()
            .collect();

        Ok(Self {
            channels,
            v1,
            configs,
            upstream,
            channel_map,
            fallback_lights,
            members,
        })
    }
}

/// One decoded color record, either wire representation
#[derive(Copy, Clone, Debug)]
enum Sample {
    Rgb([u8; 3]),
    Xy(XY, u8),
}

impl Sample {
    fn rgb(self) -> [u8; 3] {
        match self {
            Self::Rgb(rgb) => rgb,
            Self::Xy(xy, bri) => xy.to_rgb(f64::from(bri)),
        }
    }
}

/// Update a light's state cell from one record. All-zero rgb means
/// "off" and leaves color state untouched; rgb with no brightness
/// derives one from the channel average.
#[allow(clippy::cast_possible_truncation)]
fn apply_sample(light: &Light, sample: Sample) -> [u8; 3] {
    let rgb = sample.rgb();

    if rgb == [0, 0, 0] {
        light.update_state(|state| state.on = false);
        return rgb;
    }

    match sample {
        Sample::Rgb([r, g, b]) => {
            let bri = ((u16::from(r) + u16::from(g) + u16::from(b)) / 3) as u8;
            let (xy, _) = XY::from_rgb(r, g, b);
            light.update_state(|state| {
                state.on = true;
                state.bri = bri.max(1);
                state.xy = xy;
                state.colormode = crate::resource::ColorMode::Xy;
            });
        }
        Sample::Xy(xy, bri) => {
            light.update_state(|state| {
                state.on = true;
                state.bri = bri.max(1);
                state.xy = xy;
                state.colormode = crate::resource::ColorMode::Xy;
            });
        }
    }

    rgb
}

/// Sort one record into its emitter bucket.
#[allow(clippy::too_many_arguments)]
fn bucket_record(
    buckets: &mut FrameBuckets,
    gate: &mut FrameDiffGate,
    light: &Arc<Light>,
    config: &DeviceConfig,
    segment: u8,
    whole_device: bool,
    rgb: [u8; 3],
) {
    match config {
        DeviceConfig::Native(cfg) => {
            let acc = buckets.native.entry(cfg.ip).or_default();
            if light.is_gradient() {
                if whole_device {
                    // a whole-light record paints every segment
                    for seg in 0..7 {
                        acc.set(seg, rgb);
                    }
                } else {
                    acc.set(segment, rgb);
                }
            } else {
                acc.set(cfg.light_nr.saturating_sub(1), rgb);
            }
        }
        DeviceConfig::Esphome(cfg) => {
            buckets
                .esphome
                .insert(cfg.ip, EsphomeAccumulator { color: rgb });
        }
        DeviceConfig::Wled(cfg) => {
            buckets
                .wled
                .entry(cfg.ip)
                .or_insert_with(|| WledAccumulator::new(cfg.udp_port))
                .add_record(light.id_v1, cfg, light.is_gradient(), segment, rgb);
        }
        DeviceConfig::Yeelight(cfg) => {
            let state = light.state();
            buckets.yeelight.push(YeelightSample {
                host: cfg.ip,
                decision: gate.decide(light.id_v1, state.xy, state.bri),
                rgb,
                bri: state.bri,
            });
        }
        DeviceConfig::Lifx(cfg) => {
            buckets
                .lifx
                .entry(cfg.ip)
                .or_insert_with(|| LifxAccumulator::new(cfg))
                .add_record(light.is_gradient(), segment, rgb);
        }
        DeviceConfig::Mqtt(cfg) => {
            let state = light.state();
            match gate.decide(light.id_v1, state.xy, state.bri) {
                FrameDecision::Brightness => buckets.mqtt.push(mqtt::MqttMessage {
                    topic: cfg.command_topic.clone(),
                    payload: mqtt::brightness_payload(state.bri),
                }),
                FrameDecision::Color => buckets.mqtt.push(mqtt::MqttMessage {
                    topic: cfg.command_topic.clone(),
                    payload: mqtt::color_payload(state.xy),
                }),
                FrameDecision::Noop => {}
            }
        }
        DeviceConfig::Hue(_) => {
            // forwarded natively by the stream splitter
        }
        DeviceConfig::Homeassistant(cfg) => {
            let state = light.state();
            buckets.hass.push(crate::emitter::hass::HassUpdate {
                entity_id: cfg.entity_id.clone(),
                on: state.on,
                bri: state.bri,
                xy: state.xy,
            });
        }
        DeviceConfig::Other => {
            // round-robin fallback, handled once per frame
        }
    }
}

/// Parse one frame and fill the emitter buckets, updating every
/// referenced light's state along the way. Within a frame, the last
/// record for a light wins.
pub fn build_buckets(
    frame: &[u8],
    routes: &Routes,
    gate: &mut FrameDiffGate,
) -> ApiResult<FrameBuckets> {
    let packet = HueStreamPacket::parse(frame)?;
    let mut buckets = FrameBuckets::default();

    match packet {
        HueStreamPacket::V1(pkt) => {
            // occurrence count per light becomes the segment index
            let mut seen: HashMap<u16, u8> = HashMap::new();

            let records: Vec<(HueStreamDeviceType, u16, Sample)> = match pkt.lights {
                HueStreamLightsV1::Rgb(recs) => recs
                    .iter()
                    .map(|r| (r.device_type, r.light_id, Sample::Rgb(r.rgb.to_rgb8())))
                    .collect(),
                HueStreamLightsV1::Xy(recs) => recs
                    .iter()
                    .map(|r| {
                        let (xy, bri) = r.xy.to_xy();
                        (r.device_type, r.light_id, Sample::Xy(xy, bri))
                    })
                    .collect(),
            };

            for (device_type, light_id, sample) in records {
                let counter = seen.entry(light_id).or_insert(0);
                let segment = *counter;
                *counter += 1;

                let Some(light) = routes.v1.get(&light_id) else {
                    log::trace!("v1 record for unknown light {light_id}");
                    continue;
                };
                let Some(config) = routes.configs.get(&light.id_v1) else {
                    continue;
                };

                let rgb = apply_sample(light, sample);
                let whole_device = device_type == HueStreamDeviceType::Light;
                bucket_record(&mut buckets, gate, light, config, segment, whole_device, rgb);
            }
        }
        HueStreamPacket::V2(pkt) => {
            let records: Vec<(u8, Sample)> = match pkt.lights {
                HueStreamLightsV2::Rgb(recs) => recs
                    .iter()
                    .map(|r| (r.channel, Sample::Rgb(r.rgb.to_rgb8())))
                    .collect(),
                HueStreamLightsV2::Xy(recs) => recs
                    .iter()
                    .map(|r| {
                        let (xy, bri) = r.xy.to_xy();
                        (r.channel, Sample::Xy(xy, bri))
                    })
                    .collect(),
            };

            for (channel, sample) in records {
                let Some((light, segment)) = routes.channels.get(usize::from(channel)) else {
                    log::trace!("v2 record for unknown channel {channel}");
                    continue;
                };
                let Some(config) = routes.configs.get(&light.id_v1) else {
                    continue;
                };

                let rgb = apply_sample(light, sample);
                bucket_record(&mut buckets, gate, light, config, *segment, false, rgb);
            }
        }
    }

    Ok(buckets)
}

/// Windowed fps accounting: one sample per second, a rolling minute of
/// history, logged every five seconds.
struct FpsCounter {
    lights: usize,
    window_start: Instant,
    frames: u32,
    tracker: VecDeque<f64>,
    last_log: Instant,
}

impl FpsCounter {
    const TRACKER_DEPTH: usize = 60;

    fn new(lights: usize) -> Self {
        let now = Instant::now();
        Self {
            lights,
            window_start: now,
            frames: 0,
            tracker: VecDeque::with_capacity(Self::TRACKER_DEPTH),
            last_log: now,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn tick(&mut self) {
        self.frames += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.window_start).as_secs_f64();
        if elapsed < 1.0 {
            return;
        }

        self.tracker.push_back(f64::from(self.frames) / elapsed);
        if self.tracker.len() > Self::TRACKER_DEPTH {
            self.tracker.pop_front();
        }
        self.window_start = now;
        self.frames = 0;

        if now.duration_since(self.last_log) >= FPS_LOG_INTERVAL && !self.tracker.is_empty() {
            let avg = self.tracker.iter().sum::<f64>() / self.tracker.len() as f64;
            let min = self.tracker.iter().copied().fold(f64::INFINITY, f64::min);
            let max = self.tracker.iter().copied().fold(0.0, f64::max);
            log::info!(
                "entertainment fps: avg {avg:.1}, min {min:.1}, max {max:.1} ({} lights)",
                self.lights
            );
            self.last_log = now;
        }
    }
}

/// Where the session's decrypted frames come from: our own DTLS
/// termination, or the local mirror port while the splitter owns it.
enum FrameSource {
    Dtls {
        server: DtlsServer,
        session: SslStream<UdpStream>,
    },
    Mirror(UdpSocket),
}

impl FrameSource {
    async fn read_frame(&mut self, buf: &mut [u8]) -> ApiResult<usize> {
        match self {
            Self::Dtls { session, .. } => dtls::read_frame(session, buf).await,
            Self::Mirror(socket) => {
                match timeout(FIRST_FRAME_TIMEOUT, socket.recv_from(buf)).await {
                    Ok(Ok((n, _addr))) => Ok(n),
                    Ok(Err(err)) => Err(err.into()),
                    Err(_) => Err(ApiError::EntStreamTimeout),
                }
            }
        }
    }

    fn close(self) {
        if let Self::Dtls { mut server, .. } = self {
            server.close();
        }
    }
}

/// Handle to the running splitter task, used during teardown
struct SplitterHandle {
    active_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The pipeline supervisor: waits for session-start requests from the
/// control surface and drives one streaming session at a time.
pub struct EntertainmentService {
    conf: Arc<AppConfig>,
    settings: ProfileSettings,
    res: Arc<Mutex<Resources>>,
    mapper: Arc<UuidMapper>,
}

impl EntertainmentService {
    #[must_use]
    pub fn new(
        conf: Arc<AppConfig>,
        profile: &ResourceProfile,
        res: Arc<Mutex<Resources>>,
        mapper: Arc<UuidMapper>,
    ) -> Self {
        Self {
            conf,
            settings: profile.settings.clone(),
            res,
            mapper,
        }
    }

    fn gate_tolerances(&self) -> Tolerances {
        let music = &self.conf.yeelight.music;
        Tolerances {
            cie: music.cie_tolerance.unwrap_or(self.settings.cie_tolerance),
            bri: music.bri_tolerance.unwrap_or(self.settings.bri_tolerance),
        }
    }

    async fn run_session(&self, group_id: u32) -> ApiResult<()> {
        let (group, user) = {
            let mut lock = self.res.lock().await;

            let owner = lock.group(group_id)?.stream.owner.clone();
            let user = lock.streaming_user(owner.as_deref())?.clone();

            let grp = lock.group_mut(group_id)?;
            grp.stream.active = true;
            if grp.stream.owner.is_none() {
                grp.stream.owner = Some(user.username.clone());
            }

            (grp.clone(), user)
        };

        log::info!(
            "starting entertainment session for group {group_id} ({})",
            group.name
        );
        log::debug!("psk identity: {}", user.username);

        let routes = {
            let lock = self.res.lock().await;
            Routes::build(&group, &lock)?
        };

        for light in &routes.members {
            light.update_state(|state| {
                state.mode = LightMode::Streaming;
                state.on = true;
                state.colormode = crate::resource::ColorMode::Xy;
            });
        }

        let mut emitters = Emitters::start(&self.conf, &self.settings).await;

        let result = self
            .stream_frames(group_id, &group, &user, &routes, &mut emitters)
            .await;

        self.teardown(group_id, &routes, &mut emitters).await;

        match &result {
            Ok(()) => log::info!("entertainment session for group {group_id} finished"),
            Err(err) => log::error!(
                "entertainment session for group {group_id} ended: {err} ({:?})",
                err.session_kind()
            ),
        }

        result
    }

    /// Launch the frame source (splitter or direct DTLS) and pump
    /// frames until cancellation or a fatal error.
    async fn stream_frames(
        &self,
        group_id: u32,
        group: &EntertainmentGroup,
        user: &crate::resource::ApiUser,
        routes: &Routes,
        emitters: &mut Emitters,
    ) -> ApiResult<()> {
        let entm_addr = SocketAddr::new(
            IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            self.conf.bridge.entm_port,
        );

        let (mut source, splitter) = self
            .open_source(group_id, group, user, routes, entm_addr)
            .await?;

        let mut gate = FrameDiffGate::new(self.gate_tolerances());
        let mut fallback = FallbackRoundRobin::new(routes.fallback_lights.clone());
        let mut fps = FpsCounter::new(routes.members.len());
        let mut invalid = 0u32;
        let mut buf = [0u8; 1024];

        let result = loop {
            if !self.res.lock().await.group(group_id)?.stream.active {
                log::debug!("stream.active cleared, stopping session");
                break Ok(());
            }

            let n = match source.read_frame(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(err) => break Err(err),
            };

            match build_buckets(&buf[..n], routes, &mut gate) {
                Ok(buckets) => {
                    invalid = 0;
                    emitters.dispatch(buckets).await;

                    if !fallback.is_empty() {
                        let requests = fallback.requests(&mut gate);
                        let lock = self.res.lock().await;
                        for req in requests {
                            lock.backend_request(req);
                        }
                    }

                    fps.tick();
                }
                Err(err) => {
                    invalid += 1;
                    log::warn!("invalid entertainment frame ({invalid} in a row): {err}");
                    if invalid >= MAX_INVALID_FRAMES {
                        break Err(ApiError::EntStreamBadFrames(invalid));
                    }
                }
            }
        };

        source.close();

        if let Some(handle) = splitter {
            handle.active_tx.send(false).ok();
            if let Err(err) = handle.task.await {
                log::debug!("splitter task join failed: {err}");
            }
        }

        result
    }

    /// Decide between the splitter path and a direct DTLS termination.
    /// Upstream sync or launch failures downgrade to local-only; only
    /// a failure to terminate DTLS at all refuses the session.
    async fn open_source(
        &self,
        group_id: u32,
        group: &EntertainmentGroup,
        user: &crate::resource::ApiUser,
        routes: &Routes,
        entm_addr: SocketAddr,
    ) -> ApiResult<(FrameSource, Option<SplitterHandle>)> {
        if !routes.upstream.is_empty() {
            if let Some(hue_conf) = &self.conf.hue {
                match self
                    .launch_splitter(group_id, group, user, routes, entm_addr, hue_conf)
                    .await
                {
                    Ok(pair) => return Ok(pair),
                    Err(err) => {
                        log::warn!("splitter unavailable, continuing local-only: {err}");
                    }
                }
            } else {
                log::warn!("group has hue lights but no upstream bridge is configured");
            }
        }

        let mut server = DtlsServer::new(entm_addr, user.username.clone(), user.client_key)?;
        server.bind().await?;

        let session = timeout(FIRST_FRAME_TIMEOUT, server.accept())
            .await
            .map_err(|_| ApiError::EntStreamTimeout)??;

        Ok((FrameSource::Dtls { server, session }, None))
    }

    async fn launch_splitter(
        &self,
        group_id: u32,
        group: &EntertainmentGroup,
        user: &crate::resource::ApiUser,
        routes: &Routes,
        entm_addr: SocketAddr,
        hue_conf: &crate::config::UpstreamHueConfig,
    ) -> ApiResult<(FrameSource, Option<SplitterHandle>)> {
        let bridge = Arc::new(UpstreamBridge::new(hue_conf)?);

        let (upstream_group, upstream_uuid) = bridge
            .sync_group(group, &routes.upstream, &self.mapper)
            .await?;

        // both sides must observe the same entertainment identity
        {
            let mut lock = self.res.lock().await;
            let grp = lock.group_mut(group_id)?;
            grp.id_v2 = upstream_uuid;
            grp.upstream_group_id = Some(upstream_group);
            grp.upstream_uuid = Some(upstream_uuid);
        }

        let mirror_addr = SocketAddr::new(
            IpAddr::V4(self.conf.streaming.mirror_host),
            self.conf.streaming.mirror_port,
        );

        // bind the mirror listener before the splitter starts feeding it
        let mirror = UdpSocket::bind(mirror_addr).await?;

        let mut target = SplitterTarget::launch(
            bridge,
            upstream_group,
            upstream_uuid,
            routes.channel_map.clone(),
        )
        .await?;

        // from here on the upstream stream is active; any launch
        // failure must take it down again
        let mut splitter = match StreamSplitter::launch(
            entm_addr,
            user.username.clone(),
            user.client_key,
            mirror_addr,
        )
        .await
        {
            Ok(splitter) => splitter,
            Err(err) => {
                target.deactivate().await;
                return Err(err);
            }
        };
        splitter.add_target(target);

        let (active_tx, active_rx) = watch::channel(true);
        let task = tokio::spawn(async move {
            if let Err(err) = splitter.run(active_rx).await {
                log::error!("splitter terminated: {err}");
            }
            splitter.drain().await;
        });

        Ok((
            FrameSource::Mirror(mirror),
            Some(SplitterHandle { active_tx, task }),
        ))
    }

    /// The single teardown path. Idempotent: a second run observes the
    /// same external state.
    async fn teardown(&self, group_id: u32, routes: &Routes, emitters: &mut Emitters) {
        {
            let mut lock = self.res.lock().await;
            if let Ok(group) = lock.group_mut(group_id) {
                group.stream.active = false;
                group.stream.owner = None;
            }
        }

        for light in &routes.members {
            light.update_state(|state| state.mode = LightMode::Homeautomation);
        }

        emitters.close();

        if emitters.open_sockets() > 0 {
            log::warn!("socket pool not empty after teardown");
        }
    }
}

#[async_trait]
impl Service for EntertainmentService {
    type Error = ApiError;

    async fn run(&mut self) -> ApiResult<()> {
        let mut chan = self.res.lock().await.backend_event_stream();

        loop {
            let req = match chan.recv().await {
                Ok(req) => req,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("control stream lagged by {n} requests");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            if let BackendRequest::EntertainmentStart(group_id) = &*req {
                // errors are session results, already logged; the
                // service itself keeps serving
                let _ = self.run_session(*group_id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use hue::xy::XY;

    use crate::model::framediff::{FrameDiffGate, Tolerances};
    use crate::resource::{
        DeviceProtocol, EntertainmentGroup, Light, LightMode, Resources,
    };
    use crate::server::entertainment::{Routes, Sample, apply_sample, build_buckets};

    fn wled_light(id: u32) -> Light {
        Light::new(
            id,
            "strip",
            "LCX002",
            DeviceProtocol::Wled,
            json!({"ip": "10.0.0.4", "segment_stop": 14, "points_capable": 7}),
        )
    }

    fn hue_light(id: u32) -> Light {
        Light::new(
            id,
            format!("hue{id}"),
            "LCT015",
            DeviceProtocol::Hue,
            json!({"ip": "192.168.1.2", "hue_id": id.to_string()}),
        )
    }

    fn registry(lights: Vec<Light>) -> Resources {
        let mut res = Resources::new();
        for light in lights {
            res.add_light(light);
        }
        res
    }

    #[test]
    fn channel_map_compacts_hue_subset() {
        // scenario: [hue1, wled2, hue3, hue5]; wled drops out upstream
        let res = registry(vec![hue_light(1), wled_light(2), hue_light(3), hue_light(5)]);
        let group = EntertainmentGroup::new(200, "tv", vec![1, 2, 3, 5]);

        let routes = Routes::build(&group, &res).unwrap();

        assert_eq!(routes.channels.len(), 4);
        assert_eq!(routes.upstream.len(), 3);
        assert_eq!(
            routes.channel_map,
            std::collections::BTreeMap::from([(0, 0), (2, 1), (3, 2)])
        );
    }

    #[test]
    fn gradient_channels_count_segments() {
        let res = registry(vec![wled_light(4)]);
        let group = EntertainmentGroup::new(201, "strip", vec![4; 7]);

        let routes = Routes::build(&group, &res).unwrap();

        assert_eq!(routes.members.len(), 1);
        for (idx, (light, segment)) in routes.channels.iter().enumerate() {
            assert_eq!(light.id_v1, 4);
            assert_eq!(usize::from(*segment), idx);
        }
    }

    #[test]
    fn zero_rgb_turns_off_without_mutating_color() {
        let light = wled_light(4);
        light.update_state(|state| {
            state.on = true;
            state.bri = 111;
            state.xy = XY::new(0.4, 0.2);
        });

        apply_sample(&light, Sample::Rgb([0, 0, 0]));

        let state = light.state();
        assert!(!state.on);
        assert_eq!(state.bri, 111);
        assert_eq!(state.xy, XY::new(0.4, 0.2));
    }

    #[test]
    fn rgb_sample_derives_brightness() {
        let light = wled_light(4);
        apply_sample(&light, Sample::Rgb([30, 60, 90]));

        let state = light.state();
        assert!(state.on);
        assert_eq!(state.bri, 60);
    }

    #[test]
    fn xy_sample_applies_directly() {
        let light = wled_light(4);
        apply_sample(&light, Sample::Xy(XY::new(0.3, 0.3), 200));

        let state = light.state();
        assert!(state.on);
        assert_eq!(state.bri, 200);
        assert_eq!(state.xy, XY::new(0.3, 0.3));
        assert_eq!(state.mode, LightMode::Homeautomation);
    }

    #[test]
    fn v2_frame_fills_wled_bucket() {
        let res = registry(vec![wled_light(4)]);
        let group = EntertainmentGroup::new(202, "solo", vec![4]);
        let routes = Routes::build(&group, &res).unwrap();
        let mut gate = FrameDiffGate::new(Tolerances { cie: 0.008, bri: 6 });

        // single xy record for channel 0
        let mut frame = b"HueStream".to_vec();
        frame.extend_from_slice(&[0x02, 0x00, 0x01, 0x00, 0x00, 0x01, 0x00]);
        frame.extend_from_slice(b"01234567-89ab-cdef-0123-456789abcdef");
        frame.extend_from_slice(&[0x00, 0x4c, 0xcc, 0x4c, 0xcc, 0xc8, 0x00]);

        let buckets = build_buckets(&frame, &routes, &mut gate).unwrap();

        let acc = buckets.wled.get(&"10.0.0.4".parse().unwrap()).unwrap();
        assert_eq!(acc.total_leds, 14);
        assert_eq!(acc.udp_port, 21324);
        assert!(buckets.native.is_empty());
    }

    #[test]
    fn v1_gradient_records_accumulate_by_occurrence() {
        let res = registry(vec![wled_light(4)]);
        let group = EntertainmentGroup::new(204, "strip", vec![4; 7]);
        let routes = Routes::build(&group, &res).unwrap();
        let mut gate = FrameDiffGate::new(Tolerances { cie: 0.008, bri: 6 });

        // seven gradient-segment records for light 4, rgb mode
        let mut frame = b"HueStream".to_vec();
        frame.extend_from_slice(&[0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]);
        for seg in 0..7u8 {
            frame.extend_from_slice(&[0x01, 0x00, 0x04]);
            frame.extend_from_slice(&[seg * 30, 0x00, 0xFF, 0x00, 0x00, 0x00]);
        }

        let buckets = build_buckets(&frame, &routes, &mut gate).unwrap();

        let acc = buckets.wled.get(&"10.0.0.4".parse().unwrap()).unwrap();
        let pixels = acc.paint();
        assert_eq!(pixels.len(), 14);
        // first gradient point lands on the first led, last on the last
        assert_eq!(pixels[0], [0, 255, 0]);
        assert_eq!(pixels[13], [180, 255, 0]);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        use std::sync::Arc;

        use tokio::sync::Mutex;

        use crate::config::{
            AppConfig, BridgeConfig, PrismaConfig, ProfileOverrides, StreamingConfig,
        };
        use crate::emitter::Emitters;
        use crate::model::profile::{HostClass, ResourceProfile, settings_for};
        use crate::server::entertainment::EntertainmentService;
        use crate::upstream::uuid_map::UuidMapper;

        let conf = Arc::new(AppConfig {
            bridge: BridgeConfig {
                name: "test".to_string(),
                ipaddress: "127.0.0.1".parse().unwrap(),
                entm_port: 2100,
            },
            streaming: StreamingConfig {
                mirror_host: "127.0.0.1".parse().unwrap(),
                mirror_port: 2101,
            },
            yeelight: crate::config::YeelightConfig::default(),
            lifx: crate::config::LifxConfig::default(),
            mqtt: None,
            homeassistant: None,
            hue: None,
            profile: ProfileOverrides::default(),
            prisma: PrismaConfig {
                uuid_map_file: "uuid_map.json".into(),
            },
        });

        let mut res = Resources::new();
        res.add_light(wled_light(4));
        let mut group = EntertainmentGroup::new(205, "tv", vec![4]);
        group.stream.active = true;
        group.stream.owner = Some("owner".to_string());
        res.add_group(group);

        let res = Arc::new(Mutex::new(res));
        let profile = ResourceProfile {
            class: HostClass::Full,
            cpu_count: 8,
            memory_gb: 16.0,
            settings: settings_for(HostClass::Full),
        };
        let mapper = Arc::new(UuidMapper::load("/dev/null".into()));
        let svc = EntertainmentService::new(conf.clone(), &profile, res.clone(), mapper);

        let routes = {
            let lock = res.lock().await;
            let group = lock.group(205).unwrap().clone();
            Routes::build(&group, &lock).unwrap()
        };
        routes.members[0].update_state(|state| state.mode = LightMode::Streaming);

        let mut emitters = Emitters::start(&conf, &profile.settings).await;

        svc.teardown(205, &routes, &mut emitters).await;
        let first = {
            let lock = res.lock().await;
            let group = lock.group(205).unwrap();
            (group.stream.active, group.stream.owner.clone())
        };

        svc.teardown(205, &routes, &mut emitters).await;
        let second = {
            let lock = res.lock().await;
            let group = lock.group(205).unwrap();
            (group.stream.active, group.stream.owner.clone())
        };

        assert_eq!(first, (false, None));
        assert_eq!(first, second);
        assert_eq!(routes.members[0].state().mode, LightMode::Homeautomation);
        assert_eq!(emitters.open_sockets(), 0);
    }

    #[test]
    fn invalid_magic_is_a_parse_error() {
        let res = registry(vec![wled_light(4)]);
        let group = EntertainmentGroup::new(203, "solo", vec![4]);
        let routes = Routes::build(&group, &res).unwrap();
        let mut gate = FrameDiffGate::new(Tolerances { cie: 0.008, bri: 6 });

        assert!(build_buckets(b"NotHueStream", &routes, &mut gate).is_err());
    }
}
