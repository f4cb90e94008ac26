use http::HeaderValue;

use super::Client;

/// Client behavior shared by every conversation.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Follow `302` and `303` redirects within a conversation.
    pub follow_redirects: bool,

    /// Maximum number of redirects followed for a single request.
    pub max_redirects: usize,

    /// Value for the `User-Agent` header, applied when a request has none.
    pub user_agent: Option<HeaderValue>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            follow_redirects: true,
            max_redirects: 20,
            user_agent: Some(HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))),
        }
    }
}

/// A builder for a client.
#[derive(Debug, Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow at most `max` redirects per request.
    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.config.follow_redirects = true;
        self.config.max_redirects = max;
        self
    }

    /// Deliver redirect responses to the caller instead of following them.
    pub fn without_redirects(mut self) -> Self {
        self.config.follow_redirects = false;
        self
    }

    /// Set the `User-Agent` applied to requests which don't carry one.
    pub fn with_user_agent(mut self, user_agent: HeaderValue) -> Self {
        self.config.user_agent = Some(user_agent);
        self
    }

    /// Don't add a `User-Agent` header.
    pub fn without_user_agent(mut self) -> Self {
        self.config.user_agent = None;
        self
    }

    /// The configured user agent.
    pub fn user_agent(&self) -> Option<&HeaderValue> {
        self.config.user_agent.as_ref()
    }

    /// Access the configuration directly.
    pub fn config(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Build the client.
    pub fn build(self) -> Client {
        Client::new(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.follow_redirects);
        assert_eq!(config.max_redirects, 20);
        assert_eq!(
            config.user_agent.unwrap(),
            concat!("parley/", env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn builder_settings() {
        let mut builder = Builder::new()
            .without_redirects()
            .with_user_agent(HeaderValue::from_static("custom/1"));
        assert_eq!(builder.user_agent().unwrap(), "custom/1");
        builder.config().max_redirects = 3;

        let client = builder.build();
        assert!(!client.config().follow_redirects);
        assert_eq!(client.config().max_redirects, 3);

        let client = Builder::new().without_user_agent().with_max_redirects(5).build();
        assert!(client.config().user_agent.is_none());
        assert!(client.config().follow_redirects);
        assert_eq!(client.config().max_redirects, 5);
    }
}
