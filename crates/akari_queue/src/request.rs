use std::{
    cmp::Ordering,
    sync::atomic::{self, AtomicBool},
};

pub type RequestId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub(crate) u16);

impl ChannelId {
    pub fn index(&self) -> u16 {
        self.0
    }
}

pub struct Request<Req> {
    id: RequestId,
    channel: ChannelId,
    priority: u8,
    aborted: AtomicBool,
    payload: Req,
}

impl<Req> Request<Req> {
    pub(crate) fn new(id: RequestId, channel: ChannelId, priority: u8, payload: Req) -> Self {
        Self {
            id,
            channel,
            priority,
            aborted: AtomicBool::new(false),
            payload,
        }
    }
    #[inline]
    pub fn id(&self) -> RequestId {
        self.id
    }
    #[inline]
    pub fn channel(&self) -> ChannelId {
        self.channel
    }
    #[inline]
    pub fn priority(&self) -> u8 {
        self.priority
    }
    pub fn payload(&self) -> &Req {
        &self.payload
    }
    pub fn into_payload(self) -> Req {
        self.payload
    }
    /// Set once the request was cancelled before a worker picked it up
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(atomic::Ordering::Acquire)
    }
    pub(crate) fn abort(&self) {
        self.aborted.store(true, atomic::Ordering::Release);
    }
}

impl<Req> std::fmt::Debug for Request<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("priority", &self.priority)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

pub enum Outcome<Res> {
    Completed(Res),
    Failed(anyhow::Error),
    Aborted,
}

pub struct Response<Req, Res> {
    request: Request<Req>,
    outcome: Outcome<Res>,
}

impl<Req, Res> Response<Req, Res> {
    pub(crate) fn new(request: Request<Req>, outcome: Outcome<Res>) -> Self {
        Self { request, outcome }
    }
    pub fn id(&self) -> RequestId {
        self.request.id
    }
    pub fn channel(&self) -> ChannelId {
        self.request.channel
    }
    pub fn request(&self) -> &Request<Req> {
        &self.request
    }
    pub fn outcome(&self) -> &Outcome<Res> {
        &self.outcome
    }
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, Outcome::Completed(_))
    }
    /// Response handlers must skip aborted responses without side effects
    pub fn is_aborted(&self) -> bool {
        self.request.is_aborted() || matches!(self.outcome, Outcome::Aborted)
    }
    pub fn into_parts(self) -> (Request<Req>, Outcome<Res>) {
        (self.request, self.outcome)
    }
}

/// Heap entry, higher priority first and FIFO within a priority
pub(crate) struct Queued<Req>(pub Request<Req>);

impl<Req> PartialEq for Queued<Req> {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl<Req> Eq for Queued<Req> {}

impl<Req> PartialOrd for Queued<Req> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<Req> Ord for Queued<Req> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.id.cmp(&self.0.id))
    }
}
