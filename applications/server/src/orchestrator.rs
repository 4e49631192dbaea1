/// Playback orchestration - the queue/timer state machine
///
/// All mutable playback state lives in one struct behind a single async
/// mutex. The device never reports playback completion, so auto-advance is
/// timer-driven: every started song arms a wake-up at `duration + buffer`.
/// Timers and auto-resume tasks carry sequence numbers; a task whose number
/// no longer matches the stored one was superseded and backs off.
use crate::config::AppConfig;
use crate::device::DeviceControl;
use crate::error::DeviceError;
use crate::gateway::FileGateway;
use crate::intent::{self, Intent, IntentParser};
use crate::probe::DurationProbe;
use aria_index::Library;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// One queued song: a minted URL plus the probed duration driving the
/// auto-advance timer. `index` is the 1-based position in the original
/// search result, kept stable for logging.
#[derive(Debug, Clone)]
pub struct SongItem {
    pub index: usize,
    pub path: PathBuf,
    pub name: String,
    pub url: String,
    pub duration_secs: f64,
}

/// Why a song was started, for the log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayTrigger {
    Search,
    Random,
    AutoAdvance,
    WhitelistResume,
}

impl fmt::Display for PlayTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlayTrigger::Search => "search",
            PlayTrigger::Random => "random",
            PlayTrigger::AutoAdvance => "auto-advance",
            PlayTrigger::WhitelistResume => "whitelist-resume",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub timer_buffer: Duration,
    pub reply_interrupt_timeout: Duration,
    pub reply_interrupt_cooldown: Duration,
    pub auto_resume_delay: Duration,
    pub refresh_interval: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            timer_buffer: Duration::from_secs_f64(config.timer_buffer_sec.max(0.0)),
            reply_interrupt_timeout: Duration::from_secs_f64(
                config.commands.reply_interrupt_timeout_sec.max(0.0),
            ),
            reply_interrupt_cooldown: Duration::from_secs_f64(
                config.commands.reply_interrupt_cooldown_sec.max(0.0),
            ),
            auto_resume_delay: Duration::from_secs_f64(
                config.commands.auto_resume_delay_sec.max(0.0),
            ),
            refresh_interval: Duration::from_secs_f64(
                config.search.refresh_interval_sec.max(0.0),
            ),
        }
    }
}

struct TimerHandle {
    seq: u64,
    abort: AbortHandle,
}

struct ArmedWindow {
    at: Instant,
    reason: String,
}

#[derive(Default)]
struct PlayerState {
    current: Option<SongItem>,
    queue: VecDeque<SongItem>,
    timer: Option<TimerHandle>,
    timer_seq: u64,
    reply_armed: Option<ArmedWindow>,
    last_reply_text: String,
    last_reply_stop: Option<Instant>,
    resume_seq: u64,
    resume_task: Option<AbortHandle>,
}

/// Snapshot of the queue state, for the CLI and tests.
#[derive(Debug, Clone)]
pub struct PlaybackStatus {
    pub current: Option<SongItem>,
    pub queued: usize,
    pub timer_armed: bool,
}

pub struct Orchestrator {
    device: Arc<dyn DeviceControl>,
    probe: Arc<dyn DurationProbe>,
    library: Arc<Library>,
    gateway: Arc<FileGateway>,
    intents: IntentParser,
    settings: OrchestratorSettings,
    state: Mutex<PlayerState>,
    refresh_lock: Mutex<()>,
    weak_self: Weak<Orchestrator>,
}

impl Orchestrator {
    pub fn new(
        device: Arc<dyn DeviceControl>,
        probe: Arc<dyn DurationProbe>,
        library: Arc<Library>,
        gateway: Arc<FileGateway>,
        intents: IntentParser,
        settings: OrchestratorSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            device,
            probe,
            library,
            gateway,
            intents,
            settings,
            state: Mutex::new(PlayerState::default()),
            refresh_lock: Mutex::new(()),
            weak_self: weak_self.clone(),
        })
    }

    /// Owned handle for background tasks; valid whenever a method runs.
    fn handle(&self) -> Arc<Self> {
        self.weak_self.upgrade().expect("orchestrator dropped")
    }

    /// Entry point for a final ASR transcript.
    ///
    /// Barge-in arbitration runs first: a whitelisted utterance keeps the
    /// queue and schedules an auto-resume, anything else clears it. Then the
    /// transcript is classified and the matching action spawned.
    pub async fn on_final_asr(&self, text: &str) {
        info!(text, "final ASR transcript");
        self.handle_barge_in(text).await;

        match self.intents.classify(text) {
            Intent::Stop => {
                self.disarm_reply_interrupt("stop command").await;
                let this = self.handle();
                tokio::spawn(async move { this.stop_music().await });
            }
            Intent::Refresh => {
                self.arm_reply_interrupt("voice refresh").await;
                let this = self.handle();
                tokio::spawn(async move { this.refresh_and_reply("voice refresh").await });
            }
            Intent::Random => {
                self.arm_reply_interrupt("voice random play").await;
                let this = self.handle();
                tokio::spawn(async move { this.play_random().await });
            }
            Intent::Play(keyword) => {
                self.arm_reply_interrupt(&format!("voice search: {keyword}"))
                    .await;
                let this = self.handle();
                tokio::spawn(async move { this.play_by_keyword(&keyword).await });
            }
            Intent::Unmatched => {}
        }
    }

    async fn handle_barge_in(&self, text: &str) {
        if self.intents.is_whitelisted(text) {
            self.disarm_reply_interrupt("whitelisted utterance").await;
            info!(text, "whitelisted utterance, keeping queue");
            self.schedule_auto_resume(text).await;
            return;
        }
        let cleared = self.clear_queue(true).await;
        self.disarm_reply_interrupt("user barge-in").await;
        info!(text, cleared, "user utterance cleared queue and stopped playback");
    }

    /// Search the library and replace the queue with the matches.
    pub async fn play_by_keyword(&self, keyword: &str) {
        if !self.library.has_dirs() {
            self.speak("本地音乐目录还没有配置").await;
            return;
        }

        info!(keyword, "search request");
        let needle = intent::normalize(keyword).to_lowercase();
        let files = self.library.find(&needle);
        if files.is_empty() {
            info!(keyword, "no songs matched");
            self.speak(&format!("没有找到包含{keyword}的歌曲")).await;
            return;
        }

        let count = files.len();
        let songs = self.build_song_items(files).await;
        if songs.is_empty() {
            warn!(keyword, "matches found but none playable");
            self.speak("没有可播放的歌曲，无法解析音频时长").await;
            return;
        }

        let cleared = self.clear_queue(true).await;
        info!(keyword, hits = count, cleared, "replacing queue with search results");
        log_queue(&songs);
        self.speak(&format!("好的，找到{count}首歌曲")).await;
        self.install_and_start(songs, PlayTrigger::Search).await;
    }

    /// Replace the queue with a random selection from the whole library.
    pub async fn play_random(&self) {
        if !self.library.has_dirs() {
            self.speak("本地音乐目录还没有配置").await;
            return;
        }

        info!("random play request");
        let files = self.library.random_pick();
        if files.is_empty() {
            info!("random play with an empty library");
            self.speak("曲库为空，无法随机播放").await;
            return;
        }

        let count = files.len();
        let songs = self.build_song_items(files).await;
        if songs.is_empty() {
            warn!("random selection exists but none playable");
            self.speak("没有可播放的歌曲，无法解析音频时长").await;
            return;
        }

        let cleared = self.clear_queue(true).await;
        info!(hits = count, cleared, "replacing queue with random selection");
        log_queue(&songs);
        self.speak(&format!("好的，随机播放{count}首歌曲")).await;
        self.install_and_start(songs, PlayTrigger::Random).await;
    }

    pub async fn stop_music(&self) {
        let cleared = self.clear_queue(true).await;
        info!(cleared, "stopped playback and cleared the queue");
    }

    /// Cancel the timer, drop every queued song and forget the current one.
    /// Returns how many songs were discarded (queue + current).
    pub async fn clear_queue(&self, stop_device: bool) -> usize {
        let mut state = self.state.lock().await;
        self.clear_queue_locked(&mut state, stop_device).await
    }

    async fn clear_queue_locked(&self, state: &mut PlayerState, stop_device: bool) -> usize {
        let cleared = state.queue.len() + usize::from(state.current.is_some());
        cancel_timer_locked(state);
        state.queue.clear();
        state.current = None;
        if stop_device {
            if let Err(err) = self.device.stop().await {
                warn!(%err, "device stop failed");
            }
        }
        cleared
    }

    pub async fn status(&self) -> PlaybackStatus {
        let state = self.state.lock().await;
        PlaybackStatus {
            current: state.current.clone(),
            queued: state.queue.len(),
            timer_armed: state.timer.is_some(),
        }
    }

    pub async fn last_reply_text(&self) -> String {
        self.state.lock().await.last_reply_text.clone()
    }

    // ---- reply-interrupt window -------------------------------------------

    pub async fn arm_reply_interrupt(&self, reason: &str) {
        let mut state = self.state.lock().await;
        state.reply_armed = Some(ArmedWindow {
            at: Instant::now(),
            reason: reason.to_string(),
        });
        info!(reason, "reply-interrupt window armed");
    }

    pub async fn disarm_reply_interrupt(&self, trigger: &str) {
        let mut state = self.state.lock().await;
        disarm_locked(&mut state, trigger);
    }

    /// A reply-candidate event captured by the dispatcher.
    ///
    /// Every candidate is recorded; only the speaker's own speak event
    /// (`SpeechSynthesizer`/`Speak`) can trigger a stop, and only while the
    /// window is armed and the cooldown has elapsed.
    pub async fn capture_reply(&self, namespace: &str, name: &str, text: &str) {
        let mut state = self.state.lock().await;
        state.last_reply_text = text.to_string();
        info!(namespace, name, text, "captured assistant reply");

        if !is_armed_locked(&mut state, self.settings.reply_interrupt_timeout) {
            return;
        }
        let is_speak_event = namespace.to_lowercase().contains("speechsynthesizer")
            && name.to_lowercase().contains("speak");
        if !is_speak_event {
            return;
        }
        let now = Instant::now();
        if let Some(last) = state.last_reply_stop {
            if now.duration_since(last) < self.settings.reply_interrupt_cooldown {
                return;
            }
        }
        state.last_reply_stop = Some(now);
        drop(state);

        let this = self.handle();
        tokio::spawn(async move { this.interrupt_reply().await });
    }

    async fn interrupt_reply(&self) {
        {
            let mut state = self.state.lock().await;
            if !is_armed_locked(&mut state, self.settings.reply_interrupt_timeout) {
                return;
            }
        }
        info!("reply-interrupt window hit, stopping assistant speech");
        if let Err(err) = self.device.stop().await {
            warn!(%err, "device stop failed during reply interrupt");
        }
    }

    // ---- whitelist auto-resume --------------------------------------------

    /// After a whitelisted utterance the assistant answers over ducked
    /// music; re-issuing the play command restores it. Each schedule
    /// supersedes the previous one.
    async fn schedule_auto_resume(&self, text: &str) {
        let mut state = self.state.lock().await;
        if state.current.is_none() {
            return;
        }
        state.resume_seq += 1;
        let seq = state.resume_seq;
        if let Some(task) = state.resume_task.take() {
            task.abort();
        }
        let delay = self
            .settings
            .auto_resume_delay
            .max(Duration::from_millis(100));
        info!(text, delay_secs = delay.as_secs_f64(), "scheduling auto-resume");
        let this = self.handle();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.auto_resume(seq).await;
        });
        state.resume_task = Some(handle.abort_handle());
    }

    async fn auto_resume(&self, seq: u64) {
        let mut state = self.state.lock().await;
        if seq != state.resume_seq {
            return;
        }
        let Some(song) = state.current.clone() else {
            return;
        };
        info!(name = %song.name, "auto-resuming playback");
        cancel_timer_locked(&mut state);
        self.start_song_locked(&mut state, song, PlayTrigger::WhitelistResume)
            .await;
    }

    // ---- refresh ----------------------------------------------------------

    /// Refresh under the refresh mutex. Used by startup, the CLI and the
    /// periodic loop; voice goes through `refresh_and_reply`.
    pub async fn refresh_index(&self, reason: &str) -> crate::error::Result<(usize, Duration)> {
        let _guard = self.refresh_lock.lock().await;
        let started = Instant::now();
        let total = self.library.refresh().await?;
        let elapsed = started.elapsed();
        info!(
            reason,
            total,
            elapsed_ms = elapsed.as_millis() as u64,
            "music index refreshed"
        );
        Ok((total, elapsed))
    }

    pub async fn refresh_and_reply(&self, reason: &str) {
        // A refresh in progress is reported, not queued.
        match self.refresh_lock.try_lock() {
            Ok(guard) => drop(guard),
            Err(_) => {
                self.speak("曲库正在刷新，请稍候").await;
                return;
            }
        }
        self.speak("正在刷新曲库，请稍候").await;
        match self.refresh_index(reason).await {
            Ok((total, elapsed)) => {
                self.speak(&format!(
                    "曲库刷新完成，共{total}首，耗时{:.1}秒",
                    elapsed.as_secs_f64()
                ))
                .await;
            }
            Err(err) => {
                error!(reason, %err, "music index refresh failed");
                self.speak("曲库刷新失败，请稍后重试").await;
            }
        }
    }

    /// Periodic refresh loop; never started when the interval is zero.
    pub async fn periodic_refresh(self: Arc<Self>) {
        let interval = self.settings.refresh_interval.max(Duration::from_secs(1));
        info!(
            interval_secs = interval.as_secs_f64(),
            "periodic index refresh started"
        );
        loop {
            tokio::time::sleep(interval).await;
            if self.refresh_lock.try_lock().is_err() {
                info!("skipping scheduled refresh, another refresh is running");
                continue;
            }
            if let Err(err) = self.refresh_index("scheduled").await {
                error!(%err, "scheduled refresh failed");
            }
        }
    }

    // ---- device wrappers ---------------------------------------------------

    /// Speak through the device. Our own output is legitimate, so the
    /// reply-interrupt window disarms first.
    pub async fn speak(&self, text: &str) {
        if let Err(err) = self.speak_checked(text).await {
            warn!(%err, text, "device speak failed");
        }
    }

    pub async fn speak_checked(&self, text: &str) -> Result<Value, DeviceError> {
        self.disarm_reply_interrupt("about to speak").await;
        self.device.speak(text).await
    }

    pub async fn ask_checked(&self, text: &str) -> Result<Value, DeviceError> {
        self.disarm_reply_interrupt("about to ask").await;
        self.device.ask(text).await
    }

    /// Play an arbitrary URL, outside queue management (CLI `music`).
    pub async fn play_url_checked(&self, url: &str) -> Result<Value, DeviceError> {
        self.disarm_reply_interrupt("about to play").await;
        self.device.play_url(url).await
    }

    // ---- internals ---------------------------------------------------------

    /// Probe durations and mint URLs for search results. Songs whose
    /// duration cannot be determined are dropped: without a duration the
    /// auto-advance timer could never be armed.
    async fn build_song_items(&self, files: Vec<PathBuf>) -> Vec<SongItem> {
        let mut songs = Vec::with_capacity(files.len());
        for (idx, path) in files.into_iter().enumerate() {
            let Some(duration_secs) = self.probe.probe(&path).await else {
                warn!(path = %path.display(), "skipping song with unknown duration");
                continue;
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let url = self.gateway.create_file_url(&path);
            songs.push(SongItem {
                index: idx + 1,
                path,
                name,
                url,
                duration_secs,
            });
        }
        songs
    }

    async fn install_and_start(&self, songs: Vec<SongItem>, trigger: PlayTrigger) {
        let mut state = self.state.lock().await;
        state.queue = songs.into();
        let Some(first) = state.queue.pop_front() else {
            return;
        };
        info!(
            index = first.index,
            name = %first.name,
            remaining = state.queue.len(),
            "starting first song of new queue"
        );
        self.start_song_locked(&mut state, first, trigger).await;
    }

    /// Start `song` while holding the state lock: set it current, fire the
    /// play command and arm the advance timer before the lock is released.
    async fn start_song_locked(
        &self,
        state: &mut PlayerState,
        song: SongItem,
        trigger: PlayTrigger,
    ) {
        state.current = Some(song.clone());
        disarm_locked(state, "about to play");
        match self.device.play_url(&song.url).await {
            Ok(reply) => debug!(?reply, "play command reply"),
            Err(err) => warn!(%err, url = %song.url, "device play command failed"),
        }
        info!(
            trigger = %trigger,
            index = song.index,
            name = %song.name,
            duration_secs = song.duration_secs,
            remaining = state.queue.len(),
            path = %song.path.display(),
            "song started"
        );
        self.schedule_timer_locked(state, song.duration_secs);
    }

    fn schedule_timer_locked(&self, state: &mut PlayerState, duration_secs: f64) {
        cancel_timer_locked(state);
        state.timer_seq += 1;
        let seq = state.timer_seq;
        let wait = Duration::from_secs_f64(duration_secs.max(0.1)) + self.settings.timer_buffer;
        let this = self.handle();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            this.on_timer(seq).await;
        });
        state.timer = Some(TimerHandle {
            seq,
            abort: handle.abort_handle(),
        });
    }

    /// Timer wake-up. The sequence check makes a stale timer (cancelled
    /// between its sleep elapsing and the lock being acquired) a no-op; the
    /// handle is taken out before anything else so the fire path can never
    /// cancel itself.
    async fn on_timer(&self, seq: u64) {
        let mut state = self.state.lock().await;
        let is_live = matches!(&state.timer, Some(timer) if timer.seq == seq);
        if !is_live {
            return;
        }
        state.timer = None;

        let Some(next) = state.queue.pop_front() else {
            state.current = None;
            return;
        };
        info!(
            index = next.index,
            name = %next.name,
            remaining = state.queue.len(),
            "auto-advancing to next song"
        );
        self.start_song_locked(&mut state, next, PlayTrigger::AutoAdvance)
            .await;
    }
}

fn cancel_timer_locked(state: &mut PlayerState) {
    if let Some(timer) = state.timer.take() {
        timer.abort.abort();
    }
}

fn disarm_locked(state: &mut PlayerState, trigger: &str) {
    if let Some(window) = state.reply_armed.take() {
        info!(reason = %window.reason, trigger, "reply-interrupt window disarmed");
    }
}

fn is_armed_locked(state: &mut PlayerState, timeout: Duration) -> bool {
    let expired = match &state.reply_armed {
        Some(window) => window.at.elapsed() > timeout,
        None => return false,
    };
    if expired {
        disarm_locked(state, "timeout");
        return false;
    }
    true
}

fn log_queue(songs: &[SongItem]) {
    info!(count = songs.len(), "play queue updated");
    for song in songs {
        info!(index = song.index, name = %song.name, "queued");
    }
}
