//! Addresses to application entities.
//!
//! An [`AeAddr`] couples a network address with an optional
//! application entity title,
//! written as `«ae_title»@«host»:«port»`.
//! The AE title part is validated with the same rules
//! applied when encoding it into an association request.
use std::{
    net::{SocketAddr, ToSocketAddrs},
    str::FromStr,
};

use snafu::{ResultExt, Snafu};

use crate::pdu::{validate_ae_title, AeTitleError};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ParseAeAddressError {
    #[snafu(display("invalid AE title `{}`", ae_title))]
    InvalidAeTitle {
        ae_title: String,
        source: AeTitleError,
    },

    /// the network address part is empty
    MissingAddress,

    #[snafu(display("invalid network address `{}`", address))]
    InvalidAddress { address: String },
}

/// A network address with an optional application entity title.
///
/// # Example
///
/// ```
/// # use dimse_ul::AeAddr;
/// # use std::net::SocketAddr;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let addr: AeAddr<String> = "STORE-SCP@10.0.0.5:104".parse()?;
/// assert_eq!(addr.ae_title(), Some("STORE-SCP"));
/// assert_eq!(addr.socket_addr(), "10.0.0.5:104");
///
/// let addr: AeAddr<SocketAddr> = "127.0.0.1:11112".parse()?;
/// assert_eq!(addr.ae_title(), None);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeAddr<T> {
    ae_title: Option<String>,
    socket_addr: T,
}

impl<T> AeAddr<T> {
    /// Create an address with an AE title,
    /// failing if the title could not be sent on the wire.
    pub fn new(ae_title: impl Into<String>, socket_addr: T) -> Result<Self, ParseAeAddressError> {
        let ae_title = ae_title.into();
        validate_ae_title(&ae_title).context(InvalidAeTitleSnafu {
            ae_title: ae_title.clone(),
        })?;
        Ok(AeAddr {
            ae_title: Some(ae_title),
            socket_addr,
        })
    }

    /// Create an address without an AE title.
    pub fn new_socket_addr(socket_addr: T) -> Self {
        AeAddr {
            ae_title: None,
            socket_addr,
        }
    }

    pub fn ae_title(&self) -> Option<&str> {
        self.ae_title.as_deref()
    }

    pub fn socket_addr(&self) -> &T {
        &self.socket_addr
    }

    /// The AE title of this address, or `default` if there is none.
    pub fn ae_title_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.ae_title.as_deref().unwrap_or(default)
    }

    pub fn into_parts(self) -> (Option<String>, T) {
        (self.ae_title, self.socket_addr)
    }
}

impl From<SocketAddr> for AeAddr<SocketAddr> {
    fn from(socket_addr: SocketAddr) -> Self {
        AeAddr::new_socket_addr(socket_addr)
    }
}

impl<T> FromStr for AeAddr<T>
where
    T: FromStr,
{
    type Err = ParseAeAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ae_title, address) = match s.split_once('@') {
            Some(("", address)) => (None, address),
            Some((ae_title, address)) => (Some(ae_title), address),
            None => (None, s),
        };
        if address.is_empty() {
            return MissingAddressSnafu.fail();
        }
        let socket_addr = address.parse().map_err(|_| ParseAeAddressError::InvalidAddress {
            address: address.to_string(),
        })?;
        match ae_title {
            Some(ae_title) => AeAddr::new(ae_title, socket_addr),
            None => Ok(AeAddr::new_socket_addr(socket_addr)),
        }
    }
}

impl<T> ToSocketAddrs for AeAddr<T>
where
    T: ToSocketAddrs,
{
    type Iter = T::Iter;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        self.socket_addr.to_socket_addrs()
    }
}

impl<T> std::fmt::Display for AeAddr<T>
where
    T: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ae_title) = &self.ae_title {
            write!(f, "{}@", ae_title)?;
        }
        std::fmt::Display::fmt(&self.socket_addr, f)
    }
}
