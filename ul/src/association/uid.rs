//! UID helpers for negotiation.
//!
//! UIDs of odd length may arrive padded with a trailing null byte,
//! which is not significant when comparing them.

use std::borrow::Cow;

/// The significant part of a UID.
pub(crate) fn trim_uid(uid: &str) -> &str {
    uid.trim_end_matches('\0')
}

/// Strip the padding of a UID handed to an options builder,
/// reusing its storage.
pub(crate) fn normalize_uid(uid: Cow<'_, str>) -> Cow<'_, str> {
    match uid {
        Cow::Borrowed(uid) => Cow::Borrowed(trim_uid(uid)),
        Cow::Owned(mut uid) => {
            let len = trim_uid(&uid).len();
            uid.truncate(len);
            Cow::Owned(uid)
        }
    }
}
