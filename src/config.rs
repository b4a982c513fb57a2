use std::cell::RefCell;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};
use crate::models::{FrameSize, RoomId};

pub const DEFAULT_PAGE_URL: &str = "http://localhost:3000/";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_FRAME_RATE: u32 = 30;

const ROOM_ID_PARAM: &str = "roomId";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Page the room is opened from. Its `roomId` query names the room to join.
    pub page_url: Url,
    pub room_id: Option<RoomId>,
    pub reconnect_delay: Duration,
    pub frame_rate: u32,
    pub frame_size: FrameSize,
}

impl ClientConfig {
    /// Reads the room to join from the page URL's `roomId` query parameter.
    pub fn new(page_url: &str) -> Result<Self> {
        let page_url = Url::parse(page_url)?;
        let room_id = page_url
            .query_pairs()
            .find(|(key, _)| key == ROOM_ID_PARAM)
            .map(|(_, value)| RoomId::new(value.into_owned()))
            .filter(|id| !id.as_str().is_empty());
        Ok(Self {
            page_url,
            room_id,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            frame_rate: DEFAULT_FRAME_RATE,
            frame_size: FrameSize::default(),
        })
    }

    pub fn with_room_id(mut self, room_id: Option<RoomId>) -> Self {
        if room_id.is_some() {
            self.room_id = room_id;
        }
        self
    }
}

/// WebSocket endpoint serving the page, carrying the room to join.
pub fn signaling_url(page: &Url, room_id: Option<&RoomId>) -> Result<Url> {
    let mut url = page.clone();
    let scheme = match page.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::Connect(format!("unsupported page scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Connect(format!("cannot derive {scheme} url from {page}")))?;
    url.set_path("/ws");
    url.set_query(None);
    url.set_fragment(None);
    if let Some(room_id) = room_id {
        url.query_pairs_mut().append_pair(ROOM_ID_PARAM, room_id.as_str());
    }
    Ok(url)
}

/// Page URL with `roomId` set, keeping every other query parameter.
pub fn room_link(page: &Url, room_id: &RoomId) -> Url {
    let mut url = page.clone();
    let others: Vec<(String, String)> = page
        .query_pairs()
        .filter(|(key, _)| key != ROOM_ID_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (key, value) in &others {
            query.append_pair(key, value);
        }
        query.append_pair(ROOM_ID_PARAM, room_id.as_str());
    }
    url
}

/// Where a server-assigned room identity is recorded so it can be shared and
/// rejoined.
pub trait RoomPersistence {
    fn persist_room_id(&self, room_id: &RoomId) -> Url;
}

/// Keeps the page URL, updated in place like a browser history entry.
#[derive(Debug)]
pub struct RoomLink {
    url: RefCell<Url>,
}

impl RoomLink {
    pub fn new(page: Url) -> Self {
        Self {
            url: RefCell::new(page),
        }
    }

    pub fn current(&self) -> Url {
        self.url.borrow().clone()
    }
}

impl RoomPersistence for RoomLink {
    fn persist_room_id(&self, room_id: &RoomId) -> Url {
        let link = room_link(&self.url.borrow(), room_id);
        *self.url.borrow_mut() = link.clone();
        link
    }
}
