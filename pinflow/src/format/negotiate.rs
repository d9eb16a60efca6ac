// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Ranked format matching between a producer and its peer.

use tracing::{debug, trace};

use crate::{Error, FormatDescriptor, FormatList, Result};

/// Picks the connection format for a producer pin.
///
/// With a `proposed` format, it must pass both `local_accepts` and
/// `peer_accepts`. Without one, the producer's `preferred` list is walked in
/// preference order and the first candidate the peer accepts wins. Ties are
/// broken by declaration order only.
///
/// # Errors
///
/// Returns [`Error::NoAcceptableFormat`] if no candidate satisfies both sides.
///
/// # Examples
///
/// ```
/// use pinflow::{FormatDescriptor, FormatList, Subtype, negotiate};
/// use pinflow::Error;
///
/// let preferred: FormatList = vec![
///     FormatDescriptor::any(Subtype::I420),
///     FormatDescriptor::any(Subtype::Yv12),
/// ]
/// .into();
/// let chosen = negotiate(
///     &preferred,
///     None,
///     |_| Ok(()),
///     |f| if f.subtype == Subtype::Yv12 { Ok(()) } else { Err(Error::NoAcceptableFormat) },
/// )
/// .unwrap();
/// assert_eq!(chosen.subtype, Subtype::Yv12);
/// ```
pub fn negotiate<L, P>(
    preferred: &FormatList,
    proposed: Option<&FormatDescriptor>,
    local_accepts: L,
    mut peer_accepts: P,
) -> Result<FormatDescriptor>
where
    L: Fn(&FormatDescriptor) -> Result<()>,
    P: FnMut(&FormatDescriptor) -> Result<()>,
{
    if let Some(format) = proposed {
        if let Err(err) = local_accepts(format) {
            debug!("Proposed format {:?} refused locally: {}", format.subtype, err);
            return Err(Error::NoAcceptableFormat);
        }
        if let Err(err) = peer_accepts(format) {
            debug!("Proposed format {:?} refused by peer: {}", format.subtype, err);
            return Err(Error::NoAcceptableFormat);
        }
        return Ok(format.clone());
    }

    for (index, candidate) in preferred.ranked() {
        match peer_accepts(candidate) {
            Ok(()) => {
                debug!("Negotiated {:?} (preference #{})", candidate.subtype, index);
                return Ok(candidate.clone());
            }
            Err(err) => trace!("Candidate #{} {:?} refused: {}", index, candidate.subtype, err),
        }
    }
    Err(Error::NoAcceptableFormat)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::format::{Subtype, VideoFormat};

    fn video(subtype: Subtype) -> FormatDescriptor {
        FormatDescriptor::video(subtype, VideoFormat::new(64, 48))
    }

    fn only(subtype: Subtype) -> impl Fn(&FormatDescriptor) -> Result<()> {
        move |f| {
            if f.subtype == subtype {
                Ok(())
            } else {
                Err(Error::NoAcceptableFormat)
            }
        }
    }

    #[test]
    fn first_accepted_preference_wins() {
        let preferred: FormatList = vec![video(Subtype::I420), video(Subtype::Yv12)].into();
        let offered = RefCell::new(Vec::new());
        let chosen = negotiate(&preferred, None, |_| Ok(()), |f| {
            offered.borrow_mut().push(f.subtype);
            only(Subtype::Yv12)(f)
        })
        .unwrap();
        assert_eq!(chosen.subtype, Subtype::Yv12);
        assert_eq!(*offered.borrow(), vec![Subtype::I420, Subtype::Yv12]);
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let preferred: FormatList = vec![video(Subtype::Yv12), video(Subtype::I420)].into();
        let chosen = negotiate(&preferred, None, |_| Ok(()), |_| Ok(())).unwrap();
        assert_eq!(chosen.subtype, Subtype::Yv12);
    }

    #[test]
    fn proposed_format_must_pass_both_sides() {
        let preferred: FormatList = vec![video(Subtype::I420)].into();
        let proposal = video(Subtype::Yv12);

        let err = negotiate(&preferred, Some(&proposal), only(Subtype::I420), |_| Ok(()));
        assert!(matches!(err, Err(Error::NoAcceptableFormat)));

        let err = negotiate(&preferred, Some(&proposal), |_| Ok(()), only(Subtype::I420));
        assert!(matches!(err, Err(Error::NoAcceptableFormat)));

        let ok = negotiate(&preferred, Some(&proposal), |_| Ok(()), |_| Ok(())).unwrap();
        assert_eq!(ok, proposal);
    }

    #[test]
    fn empty_or_rejected_list_fails() {
        let empty = FormatList::new();
        assert!(matches!(
            negotiate(&empty, None, |_| Ok(()), |_| Ok(())),
            Err(Error::NoAcceptableFormat)
        ));
        let preferred: FormatList = vec![video(Subtype::I420)].into();
        assert!(matches!(
            negotiate(&preferred, None, |_| Ok(()), only(Subtype::Rgb24)),
            Err(Error::NoAcceptableFormat)
        ));
    }
}
