use std::fmt;

/// A delivery channel, each served by one adapter endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    WhatsApp,
    Telegram,
    Instagram,
    /// Anything we cannot place gets the fallback adapter.
    Fallback,
}

impl Channel {
    /// Map an explicit channel hint. Unknown hints return `None` so the recipient prefix decides.
    pub fn from_hint(hint: &str) -> Option<Channel> {
        match hint {
            "whatsapp" => Some(Channel::WhatsApp),
            "telegram" => Some(Channel::Telegram),
            "instagram" => Some(Channel::Instagram),
            "default" => Some(Channel::Fallback),
            _ => None,
        }
    }

    pub fn from_recipient(recipient_id: &str) -> Channel {
        if recipient_id.starts_with("wa_") {
            Channel::WhatsApp
        } else if recipient_id.starts_with("tg_") {
            Channel::Telegram
        } else if recipient_id.starts_with("ig_") {
            Channel::Instagram
        } else {
            Channel::Fallback
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::WhatsApp => "whatsapp",
            Channel::Telegram => "telegram",
            Channel::Instagram => "instagram",
            Channel::Fallback => "default",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base URLs of the adapter services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterEndpoints {
    pub whatsapp: String,
    pub telegram: String,
    pub instagram: String,
    pub fallback: String,
}

impl Default for AdapterEndpoints {
    fn default() -> Self {
        Self {
            whatsapp: "http://connector_whatsapp:8000".to_owned(),
            telegram: "http://connector_telegram:8000".to_owned(),
            instagram: "http://connector_instagram:8000".to_owned(),
            fallback: "http://connector_mock:8000".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdapterResolver {
    endpoints: AdapterEndpoints,
}

impl AdapterResolver {
    pub fn new(endpoints: AdapterEndpoints) -> Self {
        Self { endpoints }
    }

    /// Pick the channel and adapter endpoint for one recipient. A known hint wins over the
    /// recipient prefix.
    pub fn resolve(&self, channel_hint: Option<&str>, recipient_id: &str) -> (Channel, &str) {
        let channel = channel_hint
            .and_then(Channel::from_hint)
            .unwrap_or_else(|| Channel::from_recipient(recipient_id));

        (channel, self.endpoint(channel))
    }

    pub fn endpoint(&self, channel: Channel) -> &str {
        match channel {
            Channel::WhatsApp => &self.endpoints.whatsapp,
            Channel::Telegram => &self.endpoints.telegram,
            Channel::Instagram => &self.endpoints.instagram,
            Channel::Fallback => &self.endpoints.fallback,
        }
    }
}
