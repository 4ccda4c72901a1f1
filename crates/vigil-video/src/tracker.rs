//! Video identity tracker
//!
//! A state machine over [`VideoIdentity`] driven by four trigger sources:
//! structural changes under the player container, host navigation signals,
//! cross-context page messages, and an optional periodic poll. All of them
//! funnel into the same guarded transition, so duplicate or racing triggers
//! coalesce instead of compounding.
//!
//! Rebinding (locating the freshest playback element) is decoupled from the
//! identity transition: a rebind never changes the identifier by itself, it
//! re-derives it from page state afterwards and re-enters the transition,
//! where the no-op guard absorbs anything already handled.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use vigil_dom::{NodeId, ObserveOptions, Page, Selector, SelectorError, SubscriptionId};
use vigil_observe::{ElementWaiter, HostProfile, bounded_wait};
use vigil_runtime::{ConfigSource, ExtensionContext, ListenerId, Message, MessageBus};

use crate::channel::channel_id_from_href;
use crate::identity::{ChannelIdInfo, ChannelStatus, PageType, VideoId, VideoIdentity};
use crate::{BoundedCache, extract};

/// Tracker setup failure
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("invalid selector in tracker configuration: {0}")]
    Selector(#[from] SelectorError),
}

/// Outbound wiring into the rest of the extension
pub struct TrackerCallbacks {
    /// A new identity was published (exactly one reset happened before)
    pub video_id_change: Box<dyn Fn(&VideoId)>,
    /// Channel-ownership lookup finished, one way or the other
    pub channel_id_change: Box<dyn Fn(&ChannelIdInfo)>,
    /// A different playback element was bound; true when this exact element
    /// was never bound before this session
    pub video_element_change: Box<dyn Fn(NodeId, bool)>,
    /// The first playback element of the session was bound
    pub player_init: Box<dyn Fn()>,
    /// Derived state was cleared ahead of a new identity
    pub reset_values: Box<dyn Fn()>,
    /// Every cross-context message, before the tracker interprets it
    pub window_listener_handler: Box<dyn Fn(&Message)>,
    /// Thumbnails appeared on a browse page
    pub new_videos_loaded: Box<dyn Fn(&[NodeId])>,
}

impl Default for TrackerCallbacks {
    fn default() -> Self {
        Self {
            video_id_change: Box::new(|_| {}),
            channel_id_change: Box::new(|_| {}),
            video_element_change: Box::new(|_, _| {}),
            player_init: Box::new(|| {}),
            reset_values: Box::new(|| {}),
            window_listener_handler: Box::new(|_| {}),
            new_videos_loaded: Box::new(|_| {}),
        }
    }
}

/// Selectors and bounds for one host platform
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub profile: HostProfile,
    /// The playback element the tracker binds to
    pub playback_selector: String,
    /// The embed page's title link; its href must settle before an embed
    /// identity is trusted
    pub embed_title_selector: String,
    /// Alternative locations of the channel link, raced first-wins
    pub channel_link_selectors: Vec<String>,
    /// Thumbnails reported via `new_videos_loaded` on browse pages
    pub thumbnail_selector: String,
    pub config_poll_ms: u64,
    pub config_wait_ms: u64,
    pub rebind_wait_ms: u64,
    pub embed_settle_poll_ms: u64,
    pub embed_settle_wait_ms: u64,
    pub channel_wait_ms: u64,
    /// Periodic recheck for hosts with no navigation signal at all
    pub poll_interval_ms: Option<u64>,
    pub channel_cache_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            profile: HostProfile::default(),
            playback_selector: "#player video".to_string(),
            embed_title_selector: ".player-title-link".to_string(),
            channel_link_selectors: vec![
                "#owner .channel-link".to_string(),
                ".upload-info a".to_string(),
            ],
            thumbnail_selector: "a.thumbnail".to_string(),
            config_poll_ms: 50,
            config_wait_ms: 5_000,
            rebind_wait_ms: 5_000,
            embed_settle_poll_ms: 100,
            embed_settle_wait_ms: 3_000,
            channel_wait_ms: 6_000,
            poll_interval_ms: None,
            channel_cache_capacity: 512,
        }
    }
}

#[derive(Default)]
struct Binding {
    current: Option<NodeId>,
    /// Every element bound this session, to tell first-seen from stale
    seen: HashSet<NodeId>,
    /// Last settled embed title href
    last_embed_href: Option<String>,
}

/// Handle over one tracker instance
pub struct VideoTracker {
    shared: Rc<TrackerShared>,
}

struct TrackerShared {
    page: Rc<Page>,
    ctx: Rc<ExtensionContext>,
    bus: Rc<MessageBus>,
    config: Rc<dyn ConfigSource>,
    waiter: ElementWaiter,
    cfg: TrackerConfig,
    callbacks: TrackerCallbacks,
    player_container_sel: Selector,
    thumbnail_sel: Selector,
    identity: RefCell<VideoIdentity>,
    binding: RefCell<Binding>,
    /// Bumped on every published identity; stale async continuations
    /// compare against it before committing anything
    epoch: Cell<u64>,
    rebinding: Cell<bool>,
    thumbs_pending: Cell<bool>,
    swap_sub: Cell<Option<SubscriptionId>>,
    bus_listener: Cell<Option<ListenerId>>,
    channel_cache: RefCell<BoundedCache<String>>,
}

/// One-time wiring of a tracker onto a page
pub fn setup_video_module(
    page: Rc<Page>,
    ctx: Rc<ExtensionContext>,
    bus: Rc<MessageBus>,
    config: Rc<dyn ConfigSource>,
    cfg: TrackerConfig,
    callbacks: TrackerCallbacks,
) -> Result<VideoTracker, SetupError> {
    // surface selector typos here instead of per-use warnings later
    for selector in [
        &cfg.playback_selector,
        &cfg.embed_title_selector,
        &cfg.thumbnail_selector,
    ]
    .into_iter()
    .chain(cfg.channel_link_selectors.iter())
    {
        Selector::parse(selector)?;
    }
    let waiter = ElementWaiter::new(page.clone(), ctx.clone(), &cfg.profile)?;
    let player_container_sel = Selector::parse(&cfg.profile.player_container)?;
    let thumbnail_sel = Selector::parse(&cfg.thumbnail_selector)?;
    let capacity = cfg.channel_cache_capacity;

    let shared = Rc::new(TrackerShared {
        page,
        ctx,
        bus,
        config,
        waiter,
        cfg,
        callbacks,
        player_container_sel,
        thumbnail_sel,
        identity: RefCell::new(VideoIdentity::default()),
        binding: RefCell::new(Binding::default()),
        epoch: Cell::new(0),
        rebinding: Cell::new(false),
        thumbs_pending: Cell::new(false),
        swap_sub: Cell::new(None),
        bus_listener: Cell::new(None),
        channel_cache: RefCell::new(BoundedCache::new(capacity)),
    });

    let listener_shared = shared.clone();
    let listener = shared
        .bus
        .subscribe(Rc::new(move |message| listener_shared.on_message(message)));
    shared.bus_listener.set(Some(listener));

    let cleanup_shared = shared.clone();
    shared.ctx.add_cleanup_listener(Box::new(move || {
        if let Some(id) = cleanup_shared.bus_listener.take() {
            cleanup_shared.bus.unsubscribe(id);
        }
        if let Some(id) = cleanup_shared.swap_sub.take() {
            cleanup_shared.page.hub().unsubscribe(id);
        }
    }));

    shared.bootstrap();
    if let Some(interval) = shared.cfg.poll_interval_ms {
        shared.schedule_poll(interval);
    }
    Ok(VideoTracker { shared })
}

impl VideoTracker {
    /// Currently bound playback element
    pub fn video(&self) -> Option<NodeId> {
        self.shared.binding.borrow().current
    }

    /// Current video identifier
    pub fn video_id(&self) -> Option<VideoId> {
        self.shared.identity.borrow().video_id.clone()
    }

    /// Channel identifier plus lookup status
    pub fn channel_id_info(&self) -> ChannelIdInfo {
        self.shared.identity.borrow().channel.clone()
    }

    /// True while a lookup for the current identity is still out
    pub fn waiting_for_channel_id(&self) -> bool {
        let identity = self.shared.identity.borrow();
        identity.video_id.is_some() && identity.channel.status == ChannelStatus::Fetching
    }

    pub fn is_live_premiere(&self) -> bool {
        self.shared.identity.borrow().is_live_premiere
    }

    pub fn page_type(&self) -> PageType {
        self.shared.identity.borrow().page_type
    }

    /// Drive the identity transition with an explicit identifier
    pub fn update_video_id(&self, video_id: Option<VideoId>) {
        self.shared.apply_identity(video_id);
    }

    /// Host platform reported a same-document navigation
    pub fn on_navigation(&self) {
        self.shared.navigated();
    }
}

impl TrackerShared {
    // ------------------------------------------------------------------
    // Bootstrap and triggers
    // ------------------------------------------------------------------

    fn bootstrap(self: &Rc<Self>) {
        let shared = self.clone();
        self.wait_for_config(Box::new(move |ready| {
            if !shared.ctx.is_valid() {
                return;
            }
            if !ready {
                tracing::warn!("configuration not ready, bootstrapping anyway");
            }
            let id = shared.read_page_id();
            shared.apply_identity(id);
            shared.watch_thumbnails_if_browse();
        }));
    }

    fn navigated(self: &Rc<Self>) {
        if !self.ctx.is_valid() {
            return;
        }
        self.recheck();
        self.watch_thumbnails_if_browse();
    }

    fn recheck(self: &Rc<Self>) {
        if !self.ctx.is_valid() {
            return;
        }
        let id = self.read_page_id();
        self.apply_identity(id);
    }

    fn schedule_poll(self: &Rc<Self>, interval: u64) {
        let shared = self.clone();
        self.page.timers().set_timeout(
            interval,
            Box::new(move || {
                if !shared.ctx.is_valid() {
                    return;
                }
                shared.recheck();
                shared.schedule_poll(interval);
            }),
        );
    }

    fn on_message(self: &Rc<Self>, message: &Message) {
        if !self.ctx.is_valid() {
            return;
        }
        (self.callbacks.window_listener_handler)(message);
        match message {
            Message::ClearArtwork => {}
            Message::Navigation { video_id } => {
                match video_id.as_deref().and_then(VideoId::new) {
                    Some(id) => self.apply_identity(Some(id)),
                    None => self.recheck(),
                }
            }
            Message::VideoData {
                video_id,
                is_live,
                is_premiere,
            } => match VideoId::new(video_id) {
                Some(id) => {
                    self.apply_identity(Some(id));
                    self.identity.borrow_mut().is_live_premiere = *is_live || *is_premiere;
                }
                None => {
                    tracing::warn!(video_id = %video_id, "malformed identifier in page message");
                }
            },
        }
    }

    /// Identifier as the page currently reports it: the in-page state
    /// object wins; on embed pages the title link is the live source (the
    /// address never changes there); the address string is the fallback.
    fn read_page_id(&self) -> Option<VideoId> {
        let from_state = self.page.initial_state().as_ref().and_then(extract::id_from_state);
        if from_state.is_some() {
            return from_state;
        }
        let address = self.page.address();
        if extract::page_type_from_address(&address) == PageType::Embed {
            if let Some(id) = self
                .embed_title_href()
                .as_deref()
                .and_then(extract::id_from_href)
            {
                return Some(id);
            }
        }
        extract::id_from_address(&address)
    }

    // ------------------------------------------------------------------
    // The identity transition
    // ------------------------------------------------------------------

    fn apply_identity(self: &Rc<Self>, new_id: Option<VideoId>) {
        let current = self.identity.borrow().video_id.clone();
        if new_id.is_none() && current.is_some() {
            // never drop a known-good identity on a transient null read
            tracing::trace!("null identifier ignored while an identity is active");
            return;
        }
        let bound = self.binding.borrow().current;
        let bound_visible = bound.is_some_and(|element| self.waiter.is_visible(element, false));
        if new_id == current && bound_visible {
            return;
        }
        if !bound_visible {
            self.refresh_video_element();
        }

        self.reset_values();
        {
            let mut identity = self.identity.borrow_mut();
            identity.video_id = new_id.clone();
            identity.page_type = extract::page_type_from_address(&self.page.address());
            if let Some(state) = self.page.initial_state() {
                identity.is_live_premiere = extract::live_premiere_from_state(&state);
            }
        }
        let Some(new_id) = new_id else {
            return;
        };
        let epoch = self.epoch.get() + 1;
        self.epoch.set(epoch);
        tracing::debug!(video_id = %new_id, "video identity changed");

        let shared = self.clone();
        self.wait_for_config(Box::new(move |ready| {
            if !shared.ctx.is_valid() || shared.epoch.get() != epoch {
                return;
            }
            if !ready {
                tracing::warn!("configuration not ready before identity publish");
            }
            shared.start_channel_lookup(&new_id, epoch);
            (shared.callbacks.video_id_change)(&new_id);
        }));
    }

    /// Clear derived state ahead of a new identity and tell the rest of
    /// the extension to do the same.
    fn reset_values(&self) {
        {
            let mut identity = self.identity.borrow_mut();
            identity.page_type = PageType::Unknown;
            identity.channel = ChannelIdInfo::default();
            identity.is_live_premiere = false;
        }
        (self.callbacks.reset_values)();
        self.bus.broadcast(&Message::ClearArtwork);
    }

    // ------------------------------------------------------------------
    // Rebinding
    // ------------------------------------------------------------------

    /// Locate the freshest playback element. Debounced; re-entry while a
    /// rebind is in flight is dropped. Runs off the current call stack so
    /// an in-progress transition finishes first.
    fn refresh_video_element(self: &Rc<Self>) {
        if self.rebinding.replace(true) {
            return;
        }
        let shared = self.clone();
        self.page
            .timers()
            .set_timeout(0, Box::new(move || shared.locate_video_element()));
    }

    fn locate_video_element(self: &Rc<Self>) {
        let shared = self.clone();
        let result = bounded_wait(
            &self.page,
            &self.waiter,
            &self.cfg.playback_selector,
            true,
            false,
            self.cfg.rebind_wait_ms,
            Box::new(move |result| match result {
                Ok(element) => shared.bind_video_element(element),
                Err(_) => {
                    shared.rebinding.set(false);
                    tracing::debug!("no visible playback element before deadline");
                }
            }),
        );
        if let Err(err) = result {
            self.rebinding.set(false);
            tracing::warn!(%err, "playback selector failed to parse");
        }
    }

    fn bind_video_element(self: &Rc<Self>, element: NodeId) {
        if !self.ctx.is_valid() {
            self.rebinding.set(false);
            return;
        }
        let (changed, first_seen, first_ever) = {
            let mut binding = self.binding.borrow_mut();
            let changed = binding.current != Some(element);
            if changed {
                let first_ever = binding.seen.is_empty();
                let first_seen = binding.seen.insert(element);
                binding.current = Some(element);
                (true, first_seen, first_ever)
            } else {
                (false, false, false)
            }
        };
        if changed {
            tracing::debug!(?element, first_seen, "playback element bound");
            if first_ever {
                (self.callbacks.player_init)();
            }
            (self.callbacks.video_element_change)(element, first_seen);
            self.rescope_swap_subscription(element);
        }
        if self.identity.borrow().page_type == PageType::Embed {
            let deadline = self.page.timers().now() + self.cfg.embed_settle_wait_ms;
            self.settle_embed(deadline);
        } else {
            self.finish_rebind();
        }
    }

    /// An embed that has not swapped its backing data yet still shows the
    /// previous video's title link; wait for a distinct, non-empty href
    /// before trusting the page state.
    fn settle_embed(self: &Rc<Self>, deadline: u64) {
        let current = self.embed_title_href();
        let settled = match &current {
            Some(href) => {
                !href.is_empty() && self.binding.borrow().last_embed_href.as_ref() != Some(href)
            }
            None => false,
        };
        if settled {
            self.binding.borrow_mut().last_embed_href = current;
            self.finish_rebind();
            return;
        }
        if self.page.timers().now() >= deadline {
            tracing::debug!("embed title link did not settle before deadline");
            self.finish_rebind();
            return;
        }
        let shared = self.clone();
        self.page.timers().set_timeout(
            self.cfg.embed_settle_poll_ms,
            Box::new(move || shared.settle_embed(deadline)),
        );
    }

    fn embed_title_href(&self) -> Option<String> {
        let selector = Selector::parse(&self.cfg.embed_title_selector).ok()?;
        let doc = self.page.document();
        let link = doc.query_selector(&selector)?;
        doc.attr(link, "href").map(str::to_string)
    }

    fn finish_rebind(self: &Rc<Self>) {
        self.rebinding.set(false);
        // a rebind never changes the identity itself; re-derive it and let
        // the transition guards absorb a no-op
        self.recheck();
    }

    /// Watch for future element swaps, scoped to the player container
    /// rather than the whole document.
    fn rescope_swap_subscription(self: &Rc<Self>, element: NodeId) {
        if let Some(old) = self.swap_sub.take() {
            self.page.hub().unsubscribe(old);
        }
        let scope = {
            let doc = self.page.document();
            doc.closest(element, &self.player_container_sel)
                .unwrap_or(NodeId::ROOT)
        };
        let shared = self.clone();
        let id = self.page.hub().subscribe(
            scope,
            ObserveOptions::structural(),
            Rc::new(move |_batch| shared.on_player_mutation()),
        );
        self.swap_sub.set(Some(id));
    }

    fn on_player_mutation(self: &Rc<Self>) {
        if !self.ctx.is_valid() {
            return;
        }
        let bound = self.binding.borrow().current;
        let bound_visible = bound.is_some_and(|element| self.waiter.is_visible(element, false));
        if !bound_visible {
            self.refresh_video_element();
        }
        self.recheck();
    }

    // ------------------------------------------------------------------
    // Channel ownership
    // ------------------------------------------------------------------

    /// Race the alternative channel-link locations; the first arm to
    /// produce a numeric identifier wins, losers find the race settled or
    /// the epoch moved on.
    fn start_channel_lookup(self: &Rc<Self>, video_id: &VideoId, epoch: u64) {
        let cached = self.channel_cache.borrow_mut().get(video_id.as_str()).cloned();
        if let Some(cached) = cached {
            tracing::trace!(video_id = %video_id, "channel lookup served from cache");
            self.publish_channel(
                video_id,
                ChannelIdInfo {
                    id: Some(cached),
                    status: ChannelStatus::Found,
                },
                epoch,
            );
            return;
        }
        let arms = self.cfg.channel_link_selectors.len();
        if arms == 0 {
            self.publish_channel(
                video_id,
                ChannelIdInfo {
                    id: None,
                    status: ChannelStatus::Failed,
                },
                epoch,
            );
            return;
        }
        let settled = Rc::new(Cell::new(false));
        let failures = Rc::new(Cell::new(0usize));
        for selector in &self.cfg.channel_link_selectors {
            let shared = self.clone();
            let settled = settled.clone();
            let failures = failures.clone();
            let failures_err = failures.clone();
            let video_id = video_id.clone();
            let result = bounded_wait(
                &self.page,
                &self.waiter,
                selector,
                true,
                false,
                self.cfg.channel_wait_ms,
                Box::new(move |result| {
                    if settled.get() {
                        return;
                    }
                    let extracted = match result {
                        Ok(link) => {
                            let doc = shared.page.document();
                            doc.attr(link, "href").and_then(channel_id_from_href)
                        }
                        Err(_) => None,
                    };
                    match extracted {
                        Some(channel_id) => {
                            settled.set(true);
                            shared.publish_channel(
                                &video_id,
                                ChannelIdInfo {
                                    id: Some(channel_id),
                                    status: ChannelStatus::Found,
                                },
                                epoch,
                            );
                        }
                        None => {
                            failures.set(failures.get() + 1);
                            if failures.get() == arms {
                                settled.set(true);
                                shared.publish_channel(
                                    &video_id,
                                    ChannelIdInfo {
                                        id: None,
                                        status: ChannelStatus::Failed,
                                    },
                                    epoch,
                                );
                            }
                        }
                    }
                }),
            );
            if let Err(err) = result {
                tracing::warn!(%err, "channel selector failed to parse");
                failures_err.set(failures_err.get() + 1);
            }
        }
    }

    fn publish_channel(&self, video_id: &VideoId, info: ChannelIdInfo, epoch: u64) {
        if !self.ctx.is_valid() || self.epoch.get() != epoch {
            // a newer identity superseded this lookup; its result is
            // discarded, not committed
            tracing::trace!("stale channel lookup result discarded");
            return;
        }
        if let Some(channel_id) = &info.id {
            self.channel_cache
                .borrow_mut()
                .insert(video_id.as_str(), channel_id.clone());
        }
        self.identity.borrow_mut().channel = info.clone();
        (self.callbacks.channel_id_change)(&info);
    }

    // ------------------------------------------------------------------
    // Thumbnails and configuration
    // ------------------------------------------------------------------

    fn watch_thumbnails_if_browse(self: &Rc<Self>) {
        let page_type = extract::page_type_from_address(&self.page.address());
        if matches!(
            page_type,
            PageType::Home | PageType::Channel | PageType::Search
        ) {
            self.watch_thumbnails();
        }
    }

    fn watch_thumbnails(self: &Rc<Self>) {
        if self.thumbs_pending.replace(true) {
            return;
        }
        let shared = self.clone();
        let result = self.waiter.wait_with(
            &self.cfg.thumbnail_selector,
            false,
            false,
            Box::new(move |_| {
                shared.thumbs_pending.set(false);
                if !shared.ctx.is_valid() {
                    return;
                }
                let thumbnails = {
                    let doc = shared.page.document();
                    doc.query_selector_all(&shared.thumbnail_sel)
                };
                (shared.callbacks.new_videos_loaded)(&thumbnails);
            }),
        );
        if result.is_err() {
            self.thumbs_pending.set(false);
        }
    }

    /// Poll the readiness predicate until it holds or the bound elapses;
    /// the continuation learns which it was.
    fn wait_for_config(self: &Rc<Self>, callback: Box<dyn FnOnce(bool)>) {
        if self.config.is_ready() {
            callback(true);
            return;
        }
        let deadline = self.page.timers().now() + self.cfg.config_wait_ms;
        self.poll_config(deadline, callback);
    }

    fn poll_config(self: &Rc<Self>, deadline: u64, callback: Box<dyn FnOnce(bool)>) {
        let shared = self.clone();
        self.page.timers().set_timeout(
            self.cfg.config_poll_ms,
            Box::new(move || {
                if shared.config.is_ready() {
                    callback(true);
                } else if shared.page.timers().now() >= deadline {
                    callback(false);
                } else {
                    shared.poll_config(deadline, callback);
                }
            }),
        );
    }
}
