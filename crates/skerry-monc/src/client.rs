//! The monitor session client.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use skerry_auth::{
    AuthClientHandler, AuthMethodList, AuthProtocol, AuthStatus, Keyring, SharedRotating,
    create_handler,
};
use skerry_net::{
    Connection, Dispatcher, Messenger, MonMessage, SubscribeItem, auth_result,
};
use skerry_types::EntityName;
use tokio::sync::oneshot;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::LogClient;
use crate::config::MonClientConfig;
use crate::error::MonError;
use crate::monmap::MonMap;

/// Bounded attempts for [`MonClient::get_monmap_privately`].
const PRIVATE_MONMAP_ATTEMPTS: usize = 10;

/// Per-attempt wait in [`MonClient::get_monmap_privately`].
const PRIVATE_MONMAP_WAIT: Duration = Duration::from_secs(1);

/// Session state of the monitor client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session and none being opened.
    None,
    /// Initial auth sent; waiting for the server's protocol selection.
    Negotiating,
    /// Protocol agreed; handshake rounds in flight.
    Authenticating,
    /// Authenticated session established.
    HaveSession,
}

/// Newest and oldest committed versions of a named map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapVersion {
    /// Newest committed version.
    pub newest: u64,
    /// Oldest version still available.
    pub oldest: u64,
}

struct Inner {
    state: SessionState,
    monmap: MonMap,
    want_monmap: bool,
    cur_mon: Option<String>,
    cur_con: Option<Arc<Connection>>,
    hunting: bool,
    shut_down: bool,
    global_id: u64,
    want_keys: u32,
    auth: Option<Box<dyn AuthClientHandler>>,
    authenticate_err: Option<MonError>,
    waiting_for_session: VecDeque<MonMessage>,
    version_req_id: u64,
    version_requests: HashMap<u64, oneshot::Sender<Result<MapVersion, MonError>>>,
    sub_have: BTreeMap<String, SubscribeItem>,
    sub_renew_sent: Option<Instant>,
    sub_renew_after: Option<Instant>,
    more_log_pending: bool,
    rng: SmallRng,
    tick_task: Option<JoinHandle<()>>,
}

/// Session-oriented client for the monitor cluster.
///
/// All state lives under one async mutex; messenger callbacks, the tick
/// task, and public calls all take it. The blocking calls
/// ([`authenticate`](Self::authenticate) and friends) wait on condition
/// notifications with absolute deadlines, rearmed per wake.
pub struct MonClient {
    cfg: MonClientConfig,
    entity_name: EntityName,
    messenger: Arc<dyn Messenger>,
    keyring: Arc<Keyring>,
    rotating: SharedRotating,
    log_client: Option<Arc<dyn LogClient>>,
    auth_methods: AuthMethodList,
    inner: Mutex<Inner>,
    /// Wakes authenticate / rotating-key waiters.
    auth_cond: Notify,
    /// Wakes monmap waiters.
    map_cond: Notify,
}

impl MonClient {
    /// Create a monitor client. Call [`build_initial_monmap`] and
    /// [`init`] before using it.
    ///
    /// [`build_initial_monmap`]: Self::build_initial_monmap
    /// [`init`]: Self::init
    pub fn new(
        cfg: MonClientConfig,
        entity_name: EntityName,
        messenger: Arc<dyn Messenger>,
        keyring: Arc<Keyring>,
        log_client: Option<Arc<dyn LogClient>>,
    ) -> Arc<Self> {
        let auth_methods = cfg.auth_methods_for(entity_name.kind);
        Arc::new(Self {
            cfg,
            entity_name,
            messenger,
            keyring,
            rotating: SharedRotating::default(),
            log_client,
            auth_methods,
            inner: Mutex::new(Inner {
                state: SessionState::None,
                monmap: MonMap::empty(),
                want_monmap: true,
                cur_mon: None,
                cur_con: None,
                hunting: true,
                shut_down: false,
                global_id: 0,
                want_keys: 0,
                auth: None,
                authenticate_err: None,
                waiting_for_session: VecDeque::new(),
                version_req_id: 0,
                version_requests: HashMap::new(),
                sub_have: BTreeMap::new(),
                sub_renew_sent: None,
                sub_renew_after: None,
                more_log_pending: false,
                rng: SmallRng::from_os_rng(),
                tick_task: None,
            }),
            auth_cond: Notify::new(),
            map_cond: Notify::new(),
        })
    }

    /// Rotating service keys shared with the auth handler.
    pub fn rotating(&self) -> &SharedRotating {
        &self.rotating
    }

    /// Bootstrap the monitor map from configuration.
    pub async fn build_initial_monmap(&self) -> Result<(), MonError> {
        debug!("building initial monmap from configuration");
        let map = MonMap::build_initial(&self.cfg.mon_hosts)?;
        self.inner.lock().await.monmap = map;
        Ok(())
    }

    /// Register with the messenger and start the tick task.
    pub async fn init(self: &Arc<Self>) {
        self.messenger
            .add_dispatcher(self.clone() as Arc<dyn Dispatcher>);

        let client = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let interval = {
                    let inner = client.inner.lock().await;
                    if inner.shut_down {
                        break;
                    }
                    if inner.hunting {
                        client.cfg.hunt_interval()
                    } else {
                        client.cfg.ping_interval()
                    }
                };
                tokio::time::sleep(interval).await;
                client.tick().await;
            }
        });
        self.inner.lock().await.tick_task = Some(task);
    }

    /// Stop the tick task, drop the connection, and fail all pending
    /// requests and blocked callers.
    pub async fn shutdown(&self) {
        debug!("monitor client shutting down");
        let task = {
            let mut inner = self.inner.lock().await;
            inner.shut_down = true;
            inner.state = SessionState::None;
            for (_, tx) in inner.version_requests.drain() {
                let _ = tx.send(Err(MonError::Shutdown));
            }
            inner.waiting_for_session.clear();
            inner.cur_con = None;
            inner.cur_mon = None;
            inner.tick_task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        self.auth_cond.notify_waiters();
        self.map_cond.notify_waiters();
    }

    // -------------------------------------------------------------------
    // Blocking bootstrap calls
    // -------------------------------------------------------------------

    /// Subscribe to monmap updates and wait for one to arrive.
    pub async fn get_monmap(&self) -> Result<MonMap, MonError> {
        debug!("get_monmap");
        {
            let mut inner = self.inner.lock().await;
            if inner.shut_down {
                return Err(MonError::Shutdown);
            }
            inner
                .sub_have
                .insert("monmap".to_string(), SubscribeItem { start: 0, flags: 0 });
            if inner.cur_mon.is_none() {
                self.reopen_session(&mut inner);
            }
        }

        loop {
            let mut notified = pin!(self.map_cond.notified());
            notified.as_mut().enable();
            {
                let inner = self.inner.lock().await;
                if inner.shut_down {
                    return Err(MonError::Shutdown);
                }
                if !inner.want_monmap {
                    return Ok(inner.monmap.clone());
                }
            }
            notified.await;
        }
    }

    /// Bounded synchronous monmap bootstrap: ask up to ten randomly
    /// picked monitors directly, accepting the first map with a real
    /// fsid. Leaves the client hunting with no current monitor.
    pub async fn get_monmap_privately(&self) -> Result<MonMap, MonError> {
        debug!("fetching monmap directly from a monitor");

        for attempt in 0..PRIVATE_MONMAP_ATTEMPTS {
            {
                let mut inner = self.inner.lock().await;
                if inner.shut_down {
                    return Err(MonError::Shutdown);
                }
                if !inner.monmap.fsid.is_nil() {
                    break;
                }
                if inner.monmap.size() == 0 {
                    return Err(MonError::EmptyMonMap);
                }
                let Some(mon) = self.pick_random_mon(&mut inner) else {
                    return Err(MonError::EmptyMonMap);
                };
                let Some(inst) = inner.monmap.inst_by_name(&mon) else {
                    continue;
                };
                let con = self.messenger.get_connection(&inst);
                debug!(mon, attempt, "querying monitor for its map");
                inner.cur_mon = Some(mon);
                inner.cur_con = Some(con.clone());
                self.messenger.send_message(MonMessage::GetMonMap, &con);
            }

            let mut notified = pin!(self.map_cond.notified());
            notified.as_mut().enable();
            {
                let inner = self.inner.lock().await;
                if !inner.monmap.fsid.is_nil() {
                    break;
                }
            }
            let _ = tokio::time::timeout(PRIVATE_MONMAP_WAIT, notified).await;

            let mut inner = self.inner.lock().await;
            if inner.monmap.fsid.is_nil()
                && let Some(con) = inner.cur_con.take()
            {
                self.messenger.mark_down(&con);
            }
        }

        let mut inner = self.inner.lock().await;
        inner.hunting = true;
        inner.cur_mon = None;
        inner.cur_con = None;
        if inner.monmap.fsid.is_nil() {
            Err(MonError::NoMonMap)
        } else {
            Ok(inner.monmap.clone())
        }
    }

    /// Establish an authenticated session.
    ///
    /// Idempotent: returns immediately when a session already exists. A
    /// zero `timeout` waits indefinitely; expiry maps to
    /// [`MonError::Timeout`], distinct from auth failures.
    pub async fn authenticate(&self, timeout: Duration) -> Result<(), MonError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.shut_down {
                return Err(MonError::Shutdown);
            }
            if inner.state == SessionState::HaveSession {
                debug!("already authenticated");
                return Ok(());
            }
            let start = match inner.monmap.epoch {
                0 => 0,
                epoch => epoch + 1,
            };
            inner
                .sub_have
                .insert("monmap".to_string(), SubscribeItem { start, flags: 0 });
            if inner.cur_mon.is_none() {
                self.reopen_session(&mut inner);
            }
        }

        let deadline = (!timeout.is_zero()).then(|| tokio::time::Instant::now() + timeout);
        loop {
            let mut notified = pin!(self.auth_cond.notified());
            notified.as_mut().enable();
            {
                let inner = self.inner.lock().await;
                if inner.shut_down {
                    return Err(MonError::Shutdown);
                }
                if inner.state == SessionState::HaveSession {
                    info!(global_id = inner.global_id, "authenticated");
                    return Ok(());
                }
                if let Some(err) = &inner.authenticate_err {
                    return Err(err.clone());
                }
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        warn!(?timeout, "authenticate timed out");
                        return Err(MonError::Timeout);
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Wait until rotating service keys are fresh.
    ///
    /// Returns immediately for principals that carry no rotating keys or
    /// when the negotiated protocol is `none`.
    pub async fn wait_auth_rotating(&self, timeout: Duration) -> Result<(), MonError> {
        if !self.entity_name.kind.needs_rotating_keys() {
            return Ok(());
        }
        {
            let inner = self.inner.lock().await;
            if let Some(auth) = &inner.auth
                && auth.protocol() == AuthProtocol::None
            {
                return Ok(());
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut notified = pin!(self.auth_cond.notified());
            notified.as_mut().enable();
            {
                let inner = self.inner.lock().await;
                if inner.shut_down {
                    return Err(MonError::Shutdown);
                }
            }
            if !self
                .rotating
                .lock()
                .expect("rotating lock poisoned")
                .need_new_secrets_now()
            {
                debug!("rotating keys are fresh");
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(?timeout, "wait_auth_rotating timed out");
                return Err(MonError::Timeout);
            }
        }
    }

    // -------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------

    /// Ask the monitor for the newest/oldest committed versions of a
    /// named map. Aborted with [`MonError::SessionReset`] if the session
    /// reopens before the reply arrives.
    pub async fn get_version(&self, what: &str) -> Result<MapVersion, MonError> {
        let rx = {
            let mut inner = self.inner.lock().await;
            if inner.shut_down {
                return Err(MonError::Shutdown);
            }
            inner.version_req_id += 1;
            let handle = inner.version_req_id;
            let (tx, rx) = oneshot::channel();
            inner.version_requests.insert(handle, tx);
            debug!(what, handle, "requesting map version");
            self.send_mon_message(
                &mut inner,
                MonMessage::GetVersion {
                    what: what.to_string(),
                    handle,
                },
                false,
            );
            rx
        };
        rx.await.unwrap_or(Err(MonError::Shutdown))
    }

    /// Record interest in a subscription topic. Takes effect at the next
    /// renewal (or session open).
    pub async fn sub_want(&self, topic: &str, start: u64, flags: u8) {
        let mut inner = self.inner.lock().await;
        inner
            .sub_have
            .insert(topic.to_string(), SubscribeItem { start, flags });
    }

    /// Record that `version` of a topic has been received; one-time
    /// subscriptions are dropped.
    pub async fn sub_got(&self, topic: &str, version: u64) {
        let mut inner = self.inner.lock().await;
        sub_got_locked(&mut inner, topic, version);
    }

    /// Which service key classes the principal wants delivered.
    pub async fn set_want_keys(&self, want: u32) {
        let mut inner = self.inner.lock().await;
        inner.want_keys = want;
        if let Some(auth) = inner.auth.as_mut() {
            auth.set_want_keys(want);
        }
    }

    /// Ship the log client's next pending batch, if any.
    pub async fn send_log(&self) {
        let mut inner = self.inner.lock().await;
        self.send_log_locked(&mut inner);
    }

    // -------------------------------------------------------------------
    // Internals (all called with the core lock held)
    // -------------------------------------------------------------------

    fn send_log_locked(&self, inner: &mut Inner) {
        let Some(log_client) = &self.log_client else {
            return;
        };
        if let Some(entries) = log_client.get_mon_log_message() {
            self.send_mon_message(inner, MonMessage::Log { entries }, false);
        }
        inner.more_log_pending = log_client.are_pending();
    }

    /// Send to the current monitor, or queue until a session exists
    /// (unless `force`, used by the handshake itself).
    fn send_mon_message(&self, inner: &mut Inner, msg: MonMessage, force: bool) {
        if force || inner.state == SessionState::HaveSession {
            if let Some(con) = &inner.cur_con {
                debug!(
                    mon = inner.cur_mon.as_deref().unwrap_or("?"),
                    msg = msg.type_name(),
                    "sending"
                );
                self.messenger.send_message(msg, con);
            } else {
                debug!(msg = msg.type_name(), "dropping message, no connection");
            }
        } else {
            inner.waiting_for_session.push_back(msg);
        }
    }

    /// Pick a random monitor, excluding the current one when there is a
    /// choice.
    fn pick_random_mon(&self, inner: &mut Inner) -> Option<String> {
        let n = inner.monmap.size();
        if n == 0 {
            return None;
        }
        if n == 1 {
            return inner.monmap.name_by_rank(0).map(str::to_string);
        }

        let cur_rank = inner
            .cur_mon
            .as_deref()
            .and_then(|m| inner.monmap.rank_by_name(m));
        let max = match cur_rank {
            Some(_) => n - 1,
            None => n,
        };
        let mut pick = inner.rng.random_range(0..max);
        if let Some(cur) = cur_rank
            && pick >= cur
        {
            pick += 1;
        }
        inner.monmap.name_by_rank(pick).map(str::to_string)
    }

    fn pick_new_mon(&self, inner: &mut Inner) {
        let Some(mon) = self.pick_random_mon(inner) else {
            warn!("cannot pick a monitor from an empty monmap");
            return;
        };
        if let Some(old) = inner.cur_con.take() {
            self.messenger.mark_down(&old);
        }
        if let Some(inst) = inner.monmap.inst_by_name(&mon) {
            let con = self.messenger.get_connection(&inst);
            debug!(mon, addr = %inst.addr, "picked monitor");
            inner.cur_con = Some(con);
        }
        inner.cur_mon = Some(mon);
    }

    /// Synchronous session boundary: discard queued messages, abort
    /// pending version requests, pick a new monitor, and restart the
    /// auth handshake.
    fn reopen_session(&self, inner: &mut Inner) {
        debug!("reopening monitor session");
        self.pick_new_mon(inner);

        inner.waiting_for_session.clear();
        for (_, tx) in inner.version_requests.drain() {
            let _ = tx.send(Err(MonError::SessionReset));
        }

        inner.state = SessionState::Negotiating;
        let msg = MonMessage::Auth {
            protocol: 0,
            supported: self.auth_methods.ids(),
            name: self.entity_name.clone(),
            global_id: inner.global_id,
            payload: Bytes::new(),
        };
        self.send_mon_message(inner, msg, true);

        if !inner.sub_have.is_empty() {
            self.renew_subs(inner);
        }
    }

    fn finish_hunting(&self, inner: &mut Inner) {
        if inner.hunting {
            info!(
                mon = inner.cur_mon.as_deref().unwrap_or("?"),
                "found live monitor"
            );
            inner.hunting = false;
        }
    }

    fn renew_subs(&self, inner: &mut Inner) {
        if inner.sub_have.is_empty() {
            debug!("no subscriptions to renew");
            return;
        }
        if inner.cur_mon.is_none() {
            self.reopen_session(inner);
            return;
        }
        if inner.sub_renew_sent.is_none() {
            inner.sub_renew_sent = Some(Instant::now());
        }
        debug!(topics = inner.sub_have.len(), "renewing subscriptions");
        let msg = MonMessage::Subscribe {
            what: inner.sub_have.clone(),
        };
        self.send_mon_message(inner, msg, false);
    }

    fn check_auth_tickets(&self, inner: &mut Inner) {
        if inner.state != SessionState::HaveSession {
            return;
        }
        let renewal = match inner.auth.as_mut() {
            None => return,
            Some(auth) if auth.need_tickets() => {
                Some((auth.protocol().id(), auth.build_request()))
            }
            Some(_) => None,
        };
        match renewal {
            Some((protocol, Ok(payload))) => {
                debug!("requesting new service tickets");
                let msg = MonMessage::Auth {
                    protocol,
                    supported: Vec::new(),
                    name: self.entity_name.clone(),
                    global_id: inner.global_id,
                    payload,
                };
                self.send_mon_message(inner, msg, false);
            }
            Some((_, Err(e))) => warn!(error = %e, "could not build ticket renewal"),
            None => {}
        }
        self.check_auth_rotating(inner);
    }

    fn check_auth_rotating(&self, inner: &mut Inner) {
        if !self.entity_name.kind.needs_rotating_keys() {
            return;
        }
        if inner.state != SessionState::HaveSession || inner.auth.is_none() {
            return;
        }

        let margin = Duration::from_secs(30).min(self.cfg.ticket_ttl() / 4);
        let cutoff = SystemTime::now() - margin;
        if !self
            .rotating
            .lock()
            .expect("rotating lock poisoned")
            .need_new_secrets(cutoff)
        {
            return;
        }

        let request = inner
            .auth
            .as_ref()
            .and_then(|auth| auth.build_rotating_request().map(|p| (auth.protocol().id(), p)));
        if let Some((protocol, payload)) = request {
            debug!("renewing rotating service keys");
            let msg = MonMessage::Auth {
                protocol,
                supported: Vec::new(),
                name: self.entity_name.clone(),
                global_id: inner.global_id,
                payload,
            };
            self.send_mon_message(inner, msg, false);
        }
    }

    /// Periodic work: ticket/rotating refresh, hunting, subscription
    /// renewal, keepalive, log flush.
    pub(crate) async fn tick(&self) {
        let mut inner = self.inner.lock().await;
        if inner.shut_down {
            return;
        }
        debug!(hunting = inner.hunting, state = ?inner.state, "tick");

        self.check_auth_tickets(&mut inner);

        if inner.hunting {
            info!("continuing monitor hunt");
            self.reopen_session(&mut inner);
        } else if inner.cur_mon.is_some() {
            let renew_due = inner
                .sub_renew_after
                .is_none_or(|after| Instant::now() > after);
            if renew_due && inner.sub_renew_sent.is_none() {
                self.renew_subs(&mut inner);
            }
            if let Some(con) = &inner.cur_con {
                self.messenger.send_keepalive(con);
            }
            if inner.state == SessionState::HaveSession {
                self.send_log_locked(&mut inner);
            }
        }

        if let Some(auth) = inner.auth.as_mut() {
            auth.tick();
        }
    }

    // -------------------------------------------------------------------
    // Reply handling
    // -------------------------------------------------------------------

    fn handle_monmap(&self, inner: &mut Inner, raw: Bytes) {
        let map = match MonMap::decode(raw) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "ignoring undecodable monmap");
                return;
            }
        };
        debug!(epoch = map.epoch, fsid = %map.fsid, "got monmap");
        inner.monmap = map;
        let epoch = inner.monmap.epoch;
        sub_got_locked(inner, "monmap", epoch);

        // The monitor we are talking to may have left the map.
        let peer_name = inner
            .cur_con
            .as_ref()
            .and_then(|con| inner.monmap.addr_to_name(con.peer.addr))
            .map(str::to_string);
        match peer_name {
            Some(name) => {
                inner.cur_mon = Some(name);
                self.finish_hunting(inner);
            }
            None => {
                debug!(
                    mon = inner.cur_mon.as_deref().unwrap_or("?"),
                    "current monitor left the map"
                );
                self.reopen_session(inner);
            }
        }

        inner.want_monmap = false;
        self.map_cond.notify_waiters();
    }

    fn handle_auth(
        &self,
        inner: &mut Inner,
        protocol: u32,
        result: i32,
        reply_global_id: u64,
        payload: Bytes,
    ) {
        if inner.state == SessionState::Negotiating {
            let need_new = match &inner.auth {
                None => true,
                Some(auth) => auth.protocol().id() != protocol,
            };
            if need_new {
                match create_handler(protocol, self.keyring.clone(), self.rotating.clone()) {
                    Some(mut auth) => {
                        auth.set_want_keys(inner.want_keys);
                        auth.init(&self.entity_name);
                        auth.set_global_id(inner.global_id);
                        inner.auth = Some(auth);
                    }
                    None => {
                        debug!(protocol, "no handler for selected protocol");
                        if result == auth_result::NOT_SUPPORTED {
                            warn!("monitor supports none of our auth protocols");
                            inner.authenticate_err = Some(MonError::NotSupported);
                            self.auth_cond.notify_waiters();
                        }
                        return;
                    }
                }
            } else if let Some(auth) = inner.auth.as_mut() {
                auth.reset();
            }
            inner.state = SessionState::Authenticating;
        }

        if reply_global_id != 0 && reply_global_id != inner.global_id {
            inner.global_id = reply_global_id;
            if let Some(auth) = inner.auth.as_mut() {
                auth.set_global_id(reply_global_id);
            }
            debug!(global_id = reply_global_id, "assigned global id");
        }

        enum Outcome {
            FollowUp(u32, Result<Bytes, skerry_auth::AuthError>),
            Done,
            Failed(skerry_auth::AuthError),
        }

        // Feed the handler and collect everything it produced before
        // touching the rest of the session state.
        let outcome = match inner.auth.as_mut() {
            None => {
                debug!("auth reply with no active handler");
                return;
            }
            Some(auth) => match auth.handle_response(result, payload) {
                Ok(AuthStatus::Again) => Outcome::FollowUp(auth.protocol().id(), auth.build_request()),
                Ok(AuthStatus::Done) => Outcome::Done,
                Err(e) => Outcome::Failed(e),
            },
        };

        match outcome {
            // Another round: send the follow-up request.
            Outcome::FollowUp(protocol, Ok(payload)) => {
                let msg = MonMessage::Auth {
                    protocol,
                    supported: Vec::new(),
                    name: self.entity_name.clone(),
                    global_id: inner.global_id,
                    payload,
                };
                self.send_mon_message(inner, msg, true);
            }

            Outcome::FollowUp(_, Err(e)) => {
                warn!(error = %e, "auth handshake failed");
                inner.authenticate_err = Some(e.into());
                self.auth_cond.notify_waiters();
            }

            // Handshake complete.
            Outcome::Done => {
                self.finish_hunting(inner);
                inner.authenticate_err = None;
                if inner.state != SessionState::HaveSession {
                    inner.state = SessionState::HaveSession;
                    info!(global_id = inner.global_id, "monitor session established");

                    let queued = std::mem::take(&mut inner.waiting_for_session);
                    for msg in queued {
                        self.send_mon_message(inner, msg, false);
                    }

                    if let Some(log_client) = &self.log_client {
                        log_client.reset_session();
                        self.send_log_locked(inner);
                    }
                }
                self.check_auth_tickets(inner);
                self.auth_cond.notify_waiters();
            }

            Outcome::Failed(e) => {
                self.finish_hunting(inner);
                warn!(error = %e, "authentication failed");
                inner.authenticate_err = Some(e.into());
                self.auth_cond.notify_waiters();
            }
        }
    }

    fn handle_subscribe_ack(&self, inner: &mut Inner, interval_secs: u32) {
        self.finish_hunting(inner);
        match inner.sub_renew_sent.take() {
            Some(sent) => {
                inner.sub_renew_after = Some(sent + Duration::from_secs(u64::from(interval_secs)) / 2);
                debug!(interval_secs, "subscription ack");
            }
            None => {
                // Duplicate or late ack; moving the renewal deadline
                // here would accelerate renewals.
                debug!("ignoring subscribe ack with no renewal outstanding");
            }
        }
    }

    fn handle_version_reply(&self, inner: &mut Inner, handle: u64, version: u64, oldest: u64) {
        match inner.version_requests.remove(&handle) {
            Some(tx) => {
                debug!(handle, version, oldest, "map version reply");
                let _ = tx.send(Ok(MapVersion {
                    newest: version,
                    oldest,
                }));
            }
            None => debug!(handle, "version reply with unknown handle"),
        }
    }
}

fn sub_got_locked(inner: &mut Inner, topic: &str, version: u64) {
    if let Some(item) = inner.sub_have.get_mut(topic) {
        if item.flags & skerry_net::SUBSCRIBE_ONETIME != 0 {
            inner.sub_have.remove(topic);
        } else {
            item.start = version + 1;
        }
    }
}

#[async_trait::async_trait]
impl Dispatcher for MonClient {
    async fn dispatch(&self, msg: MonMessage, conn: Arc<Connection>) {
        let mut inner = self.inner.lock().await;
        if inner.shut_down {
            return;
        }

        // Ignore anything outside the current session.
        let current = matches!(&inner.cur_con, Some(cur) if Connection::same(cur, &conn));
        if !current {
            debug!(msg = msg.type_name(), ?conn, "discarding stray monitor message");
            return;
        }

        match msg {
            MonMessage::MonMap { monmap } => self.handle_monmap(&mut inner, monmap),
            MonMessage::AuthReply {
                protocol,
                result,
                global_id,
                payload,
            } => self.handle_auth(&mut inner, protocol, result, global_id, payload),
            MonMessage::SubscribeAck { interval_secs, .. } => {
                self.handle_subscribe_ack(&mut inner, interval_secs)
            }
            MonMessage::GetVersionReply {
                handle,
                version,
                oldest,
            } => self.handle_version_reply(&mut inner, handle, version, oldest),
            MonMessage::LogAck { ack } => {
                if let Some(log_client) = &self.log_client {
                    log_client.handle_log_ack(ack);
                    if inner.more_log_pending {
                        self.send_log_locked(&mut inner);
                    }
                }
            }
            other => debug!(msg = other.type_name(), "ignoring unexpected message"),
        }
    }

    async fn handle_reset(&self, conn: Arc<Connection>) {
        let mut inner = self.inner.lock().await;
        if inner.shut_down {
            return;
        }

        let current = matches!(&inner.cur_con, Some(cur) if Connection::same(cur, &conn));
        if !current {
            debug!(?conn, "reset on stray connection");
            return;
        }
        if inner.hunting {
            return;
        }

        info!("monitor connection reset, hunting for a new monitor");
        inner.hunting = true;
        self.reopen_session(&mut inner);
    }
}

// ---------------------------------------------------------------------------
// Test observation hooks
// ---------------------------------------------------------------------------

#[cfg(test)]
impl MonClient {
    pub(crate) async fn test_state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub(crate) async fn test_hunting(&self) -> bool {
        self.inner.lock().await.hunting
    }

    pub(crate) async fn test_cur_mon(&self) -> Option<String> {
        self.inner.lock().await.cur_mon.clone()
    }

    pub(crate) async fn test_global_id(&self) -> u64 {
        self.inner.lock().await.global_id
    }

    pub(crate) async fn test_monmap(&self) -> MonMap {
        self.inner.lock().await.monmap.clone()
    }

    pub(crate) async fn test_sub_renew_after(&self) -> Option<Instant> {
        self.inner.lock().await.sub_renew_after
    }

    pub(crate) async fn test_pending_versions(&self) -> usize {
        self.inner.lock().await.version_requests.len()
    }

    pub(crate) async fn test_queued_messages(&self) -> usize {
        self.inner.lock().await.waiting_for_session.len()
    }

    pub(crate) async fn test_sub_start(&self, topic: &str) -> Option<u64> {
        self.inner
            .lock()
            .await
            .sub_have
            .get(topic)
            .map(|item| item.start)
    }
}
