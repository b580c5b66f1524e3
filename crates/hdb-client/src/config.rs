//! Connection attributes.
//!
//! A [`ConnAttrs`] value is cloned into every session when it is opened, so
//! later changes on the connector only affect sessions opened afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hdb_protocol::{Cesu8, Cesu8Transformer};
use hdb_types::ConvContext;

use crate::error::{Error, Result};
use crate::transport::{Dialer, TcpDialer};

/// Default transport deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Default buffer size announced to the server.
pub const DEFAULT_BUFFER_SIZE: usize = 16_276;
/// Default number of rows per bulk package.
pub const DEFAULT_BULK_SIZE: usize = 10_000;
/// Default TCP keep-alive.
pub const DEFAULT_TCP_KEEPALIVE: Duration = Duration::from_secs(15);
/// Default rows per fetch.
pub const DEFAULT_FETCH_SIZE: usize = 128;
/// Default LOB chunk size in bytes.
pub const DEFAULT_LOB_CHUNK_SIZE: usize = 65_536;
/// Smallest accepted LOB chunk size.
pub const MIN_LOB_CHUNK_SIZE: usize = 128;
/// Largest accepted LOB chunk size.
pub const MAX_LOB_CHUNK_SIZE: usize = i32::MAX as usize;
/// Default data format version requested at connect.
pub const DEFAULT_DFV: i32 = 8;

/// Data format versions the client can speak.
pub const SUPPORTED_DFVS: [i32; 5] = [1, 4, 6, 7, 8];

/// Attributes of the sessions a connector opens.
#[derive(Clone)]
pub struct ConnAttrs {
    timeout: Option<Duration>,
    ping_interval: Option<Duration>,
    buffer_size: usize,
    bulk_size: usize,
    tcp_keepalive: Option<Duration>,
    #[cfg(feature = "tls")]
    tls: Option<Arc<hdb_tls::TlsConnector>>,
    default_schema: Option<String>,
    dialer: Arc<dyn Dialer>,
    application_name: String,
    session_variables: BTreeMap<String, String>,
    locale: String,
    fetch_size: usize,
    lob_chunk_size: usize,
    dfv: i32,
    cesu8: Arc<dyn Cesu8Transformer>,
    empty_date_as_null: bool,
    sql_trace: bool,
}

impl Default for ConnAttrs {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            ping_interval: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            bulk_size: DEFAULT_BULK_SIZE,
            tcp_keepalive: Some(DEFAULT_TCP_KEEPALIVE),
            #[cfg(feature = "tls")]
            tls: None,
            default_schema: None,
            dialer: Arc::new(TcpDialer),
            application_name: default_application_name(),
            session_variables: BTreeMap::new(),
            locale: default_locale(),
            fetch_size: DEFAULT_FETCH_SIZE,
            lob_chunk_size: DEFAULT_LOB_CHUNK_SIZE,
            dfv: DEFAULT_DFV,
            cesu8: Arc::new(Cesu8),
            empty_date_as_null: false,
            sql_trace: false,
        }
    }
}

impl fmt::Debug for ConnAttrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ConnAttrs");
        s.field("timeout", &self.timeout)
            .field("ping_interval", &self.ping_interval)
            .field("buffer_size", &self.buffer_size)
            .field("bulk_size", &self.bulk_size)
            .field("tcp_keepalive", &self.tcp_keepalive);
        #[cfg(feature = "tls")]
        s.field("tls", &self.tls.is_some());
        s.field("default_schema", &self.default_schema)
            .field("dialer", &self.dialer)
            .field("application_name", &self.application_name)
            .field("session_variables", &self.session_variables)
            .field("locale", &self.locale)
            .field("fetch_size", &self.fetch_size)
            .field("lob_chunk_size", &self.lob_chunk_size)
            .field("dfv", &self.dfv)
            .field("empty_date_as_null", &self.empty_date_as_null)
            .field("sql_trace", &self.sql_trace)
            .finish_non_exhaustive()
    }
}

/// Name of the running executable, sent as the client application name.
fn default_application_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default()
}

/// Locale from `LANG` without the encoding suffix, e.g. `en_US`.
fn default_locale() -> String {
    std::env::var("LANG")
        .map(|lang| locale_of(&lang).to_owned())
        .unwrap_or_default()
}

fn locale_of(lang: &str) -> &str {
    let end = lang.find(['.', '@']).unwrap_or(lang.len());
    &lang[..end]
}

impl ConnAttrs {
    /// Attributes with the documented defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport deadline per read and write.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Set the transport deadline; `None` or zero disables it.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout.filter(|t| !t.is_zero());
    }

    /// Interval of the idle health check.
    #[must_use]
    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval
    }

    /// Set the idle health check interval; `None` or zero disables it.
    pub fn set_ping_interval(&mut self, interval: Option<Duration>) {
        self.ping_interval = interval.filter(|t| !t.is_zero());
    }

    /// Buffer size announced in message headers.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Set the announced buffer size.
    pub fn set_buffer_size(&mut self, size: usize) {
        self.buffer_size = size;
    }

    /// Rows per bulk package.
    #[must_use]
    pub fn bulk_size(&self) -> usize {
        self.bulk_size
    }

    /// Set the rows per bulk package.
    pub fn set_bulk_size(&mut self, size: usize) -> Result<()> {
        if size == 0 {
            return Err(Error::Config("bulk size must be greater than zero".into()));
        }
        self.bulk_size = size;
        Ok(())
    }

    /// TCP keep-alive.
    #[must_use]
    pub fn tcp_keepalive(&self) -> Option<Duration> {
        self.tcp_keepalive
    }

    /// Set the TCP keep-alive; `None` disables it.
    pub fn set_tcp_keepalive(&mut self, keepalive: Option<Duration>) {
        self.tcp_keepalive = keepalive;
    }

    /// TLS connector, if TLS is enabled.
    #[cfg(feature = "tls")]
    #[must_use]
    pub fn tls(&self) -> Option<&Arc<hdb_tls::TlsConnector>> {
        self.tls.as_ref()
    }

    /// Enable TLS with `config`; `None` disables it.
    #[cfg(feature = "tls")]
    pub fn set_tls(&mut self, config: Option<hdb_tls::TlsConfig>) -> Result<()> {
        self.tls = match config {
            Some(config) => Some(Arc::new(hdb_tls::TlsConnector::new(config)?)),
            None => None,
        };
        Ok(())
    }

    /// Schema set after authentication.
    #[must_use]
    pub fn default_schema(&self) -> Option<&str> {
        self.default_schema.as_deref()
    }

    /// Set the schema applied after authentication.
    pub fn set_default_schema(&mut self, schema: Option<String>) {
        self.default_schema = schema.filter(|s| !s.is_empty());
    }

    /// Dialer opening the byte stream.
    #[must_use]
    pub fn dialer(&self) -> &Arc<dyn Dialer> {
        &self.dialer
    }

    /// Replace the dialer.
    pub fn set_dialer(&mut self, dialer: Arc<dyn Dialer>) {
        self.dialer = dialer;
    }

    /// Application name sent in the client context.
    #[must_use]
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// Set the application name.
    pub fn set_application_name(&mut self, name: impl Into<String>) {
        self.application_name = name.into();
    }

    /// Session variables sent with the first statement.
    #[must_use]
    pub fn session_variables(&self) -> &BTreeMap<String, String> {
        &self.session_variables
    }

    /// Set the session variables.
    pub fn set_session_variables(&mut self, vars: BTreeMap<String, String>) {
        self.session_variables = vars;
    }

    /// Client locale.
    #[must_use]
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Set the client locale.
    pub fn set_locale(&mut self, locale: impl Into<String>) {
        self.locale = locale.into();
    }

    /// Rows per fetch.
    #[must_use]
    pub fn fetch_size(&self) -> usize {
        self.fetch_size
    }

    /// Set the rows per fetch.
    pub fn set_fetch_size(&mut self, size: usize) -> Result<()> {
        if size == 0 {
            return Err(Error::Config("fetch size must be greater than zero".into()));
        }
        self.fetch_size = size;
        Ok(())
    }

    /// Bytes per LOB chunk.
    #[must_use]
    pub fn lob_chunk_size(&self) -> usize {
        self.lob_chunk_size
    }

    /// Set the LOB chunk size, clamped to the accepted range.
    pub fn set_lob_chunk_size(&mut self, size: usize) {
        self.lob_chunk_size = size.clamp(MIN_LOB_CHUNK_SIZE, MAX_LOB_CHUNK_SIZE);
    }

    /// Requested data format version.
    #[must_use]
    pub fn dfv(&self) -> i32 {
        self.dfv
    }

    /// Set the requested data format version.
    pub fn set_dfv(&mut self, dfv: i32) -> Result<()> {
        if !SUPPORTED_DFVS.contains(&dfv) {
            return Err(Error::Config(format!("unsupported data format version {dfv}")));
        }
        self.dfv = dfv;
        Ok(())
    }

    /// Replace the CESU-8 transformer.
    pub fn set_cesu8(&mut self, transformer: Arc<dyn Cesu8Transformer>) {
        self.cesu8 = transformer;
    }

    /// Whether the empty date surfaces as NULL.
    #[must_use]
    pub fn empty_date_as_null(&self) -> bool {
        self.empty_date_as_null
    }

    /// Surface the empty date as NULL.
    pub fn set_empty_date_as_null(&mut self, on: bool) {
        self.empty_date_as_null = on;
    }

    /// Whether SQL texts are traced.
    #[must_use]
    pub fn sql_trace(&self) -> bool {
        self.sql_trace
    }

    /// Trace SQL texts on the `hdb::sql` target.
    pub fn set_sql_trace(&mut self, on: bool) {
        self.sql_trace = on;
    }

    /// Converter context for a negotiated data format version.
    pub(crate) fn conv_context(&self, dfv: i32) -> ConvContext {
        ConvContext {
            dfv,
            empty_date_as_null: self.empty_date_as_null,
            cesu8: Arc::clone(&self.cesu8),
            lob_chunk_size: self.lob_chunk_size,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let attrs = ConnAttrs::new();
        assert_eq!(attrs.timeout(), Some(Duration::from_secs(300)));
        assert_eq!(attrs.buffer_size(), 16_276);
        assert_eq!(attrs.bulk_size(), 10_000);
        assert_eq!(attrs.tcp_keepalive(), Some(Duration::from_secs(15)));
        assert_eq!(attrs.fetch_size(), 128);
        assert_eq!(attrs.lob_chunk_size(), 65_536);
        assert_eq!(attrs.dfv(), 8);
        assert!(attrs.ping_interval().is_none());
        assert!(attrs.default_schema().is_none());
    }

    #[test]
    fn test_size_validation() {
        let mut attrs = ConnAttrs::new();
        assert!(attrs.set_bulk_size(0).is_err());
        assert!(attrs.set_fetch_size(0).is_err());
        attrs.set_bulk_size(2).unwrap();
        assert_eq!(attrs.bulk_size(), 2);

        attrs.set_lob_chunk_size(1);
        assert_eq!(attrs.lob_chunk_size(), MIN_LOB_CHUNK_SIZE);
        attrs.set_lob_chunk_size(usize::MAX);
        assert_eq!(attrs.lob_chunk_size(), MAX_LOB_CHUNK_SIZE);
    }

    #[test]
    fn test_dfv_validation() {
        let mut attrs = ConnAttrs::new();
        assert!(attrs.set_dfv(3).is_err());
        attrs.set_dfv(1).unwrap();
        assert!(attrs.conv_context(attrs.dfv()).is_dfv1());
    }

    #[test]
    fn test_zero_durations_disable() {
        let mut attrs = ConnAttrs::new();
        attrs.set_timeout(Some(Duration::ZERO));
        attrs.set_ping_interval(Some(Duration::ZERO));
        assert!(attrs.timeout().is_none());
        assert!(attrs.ping_interval().is_none());
    }

    #[test]
    fn test_locale_of() {
        assert_eq!(locale_of("en_US.UTF-8"), "en_US");
        assert_eq!(locale_of("de_DE@euro"), "de_DE");
        assert_eq!(locale_of("C"), "C");
    }

    #[test]
    fn test_clone_is_independent() {
        let mut parent = ConnAttrs::new();
        let child = parent.clone();
        parent.set_fetch_size(7).unwrap();
        assert_eq!(child.fetch_size(), DEFAULT_FETCH_SIZE);
    }
}
