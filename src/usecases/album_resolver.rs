//! Rebuilds a grouped media post ("album") from one seed message.
//!
//! Siblings are found by probing neighbouring message ids in both directions.
//! A message without a group key (e.g. a separate caption) is stepped over; a
//! message from a different group ends the scan in that direction.

use crate::domain::SourceMessage;
use crate::ports::MessageSource;
use std::sync::Arc;
use tracing::{debug, warn};

/// How far to probe in each direction.
pub const ALBUM_SCAN_WINDOW: i32 = 50;

#[derive(Debug, Clone, Copy)]
enum Direction {
    Backward,
    Forward,
}

impl Direction {
    fn step(self, seed: i32, offset: i32) -> Option<i32> {
        match self {
            Direction::Backward => seed.checked_sub(offset).filter(|id| *id > 0),
            Direction::Forward => seed.checked_add(offset),
        }
    }
}

/// Album members plus the number of lookups that failed with an error.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAlbum {
    pub members: Vec<SourceMessage>,
    pub lookup_errors: usize,
}

/// Album resolver. Shares the message source with the crawler and the downloader.
pub struct AlbumResolver {
    source: Arc<dyn MessageSource>,
    window: i32,
}

impl AlbumResolver {
    pub fn new(source: Arc<dyn MessageSource>) -> Self {
        Self {
            source,
            window: ALBUM_SCAN_WINDOW,
        }
    }

    /// Seed plus every discoverable sibling, ascending by message id.
    ///
    /// A seed without a group key comes back alone.
    pub async fn resolve_album(&self, seed: &SourceMessage) -> Vec<SourceMessage> {
        self.resolve(seed).await.members
    }

    /// Like `resolve_album`, also reporting failed lookups.
    pub async fn resolve(&self, seed: &SourceMessage) -> ResolvedAlbum {
        let Some(grouped_id) = seed.grouped_id else {
            return ResolvedAlbum {
                members: vec![seed.clone()],
                lookup_errors: 0,
            };
        };

        let mut album = ResolvedAlbum {
            members: vec![seed.clone()],
            lookup_errors: 0,
        };
        for direction in [Direction::Backward, Direction::Forward] {
            if !self.scan(seed, grouped_id, direction, &mut album.members).await {
                album.lookup_errors += 1;
            }
        }
        album.members.sort_by_key(|m| m.id);

        debug!(
            channel_id = seed.channel_id,
            msg_id = seed.id,
            grouped_id,
            members = album.members.len(),
            lookup_errors = album.lookup_errors,
            "album resolved"
        );
        album
    }

    /// Returns false when a lookup error ended the scan.
    async fn scan(
        &self,
        seed: &SourceMessage,
        grouped_id: i64,
        direction: Direction,
        album: &mut Vec<SourceMessage>,
    ) -> bool {
        for offset in 1..=self.window {
            let Some(id) = direction.step(seed.id, offset) else {
                break;
            };
            let msg = match self.source.get_message(seed.channel_id, id).await {
                Ok(Some(m)) => m,
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        channel_id = seed.channel_id,
                        msg_id = id,
                        ?direction,
                        error = %e,
                        "album probe failed, ending scan in this direction"
                    );
                    return false;
                }
            };
            match msg.grouped_id {
                Some(g) if g == grouped_id => album.push(msg),
                Some(_) => break,
                None => continue,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySource;
    use chrono::{TimeZone, Utc};

    const CH: i64 = 1234;

    fn msg(id: i32, grouped_id: Option<i64>) -> SourceMessage {
        let mut m = SourceMessage::new(CH, id, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        m.grouped_id = grouped_id;
        m
    }

    fn ids(album: &[SourceMessage]) -> Vec<i32> {
        album.iter().map(|m| m.id).collect()
    }

    #[tokio::test]
    async fn reconstructs_album_around_caption_and_neighbour_group() {
        let source = Arc::new(InMemorySource::new().with_messages([
            msg(995, Some(555)),
            msg(996, Some(333)),
            msg(997, Some(555)),
            msg(998, Some(555)),
            msg(999, None),
            msg(1000, Some(555)),
            msg(1001, Some(555)),
            msg(1002, Some(555)),
        ]));
        let resolver = AlbumResolver::new(source.clone());
        let album = resolver.resolve_album(&msg(1000, Some(555))).await;
        assert_eq!(ids(&album), vec![997, 998, 1000, 1001, 1002]);
    }

    #[tokio::test]
    async fn null_group_messages_are_stepped_over() {
        let source = Arc::new(InMemorySource::new().with_messages([
            msg(10, Some(7)),
            msg(11, None),
            msg(12, None),
            msg(13, Some(7)),
            msg(14, None),
            msg(15, Some(7)),
        ]));
        let album = AlbumResolver::new(source)
            .resolve_album(&msg(13, Some(7)))
            .await;
        assert_eq!(ids(&album), vec![10, 13, 15]);
    }

    #[tokio::test]
    async fn missing_message_ends_scan() {
        // 20 is absent, so 19 is never reached.
        let source = Arc::new(InMemorySource::new().with_messages([
            msg(19, Some(7)),
            msg(21, Some(7)),
            msg(22, Some(7)),
        ]));
        let album = AlbumResolver::new(source)
            .resolve_album(&msg(22, Some(7)))
            .await;
        assert_eq!(ids(&album), vec![21, 22]);
    }

    #[tokio::test]
    async fn scan_is_bounded_in_each_direction() {
        let seed_id = 100;
        let mut history: Vec<SourceMessage> = (1..=200).map(|id| msg(id, None)).collect();
        history[(seed_id - 1) as usize] = msg(seed_id, Some(9));
        history[(seed_id - ALBUM_SCAN_WINDOW - 1) as usize] = msg(seed_id - ALBUM_SCAN_WINDOW, Some(9));
        history[(seed_id - ALBUM_SCAN_WINDOW - 2) as usize] =
            msg(seed_id - ALBUM_SCAN_WINDOW - 1, Some(9));
        history[(seed_id + ALBUM_SCAN_WINDOW) as usize] = msg(seed_id + ALBUM_SCAN_WINDOW + 1, Some(9));
        let source = Arc::new(InMemorySource::new().with_messages(history));

        let album = AlbumResolver::new(source.clone())
            .resolve_album(&msg(seed_id, Some(9)))
            .await;

        assert_eq!(ids(&album), vec![seed_id - ALBUM_SCAN_WINDOW, seed_id]);
        assert_eq!(source.lookups(), 2 * ALBUM_SCAN_WINDOW as usize);
    }

    #[tokio::test]
    async fn lone_seed_is_a_singleton() {
        let source = Arc::new(InMemorySource::new().with_message(msg(5, Some(1))));
        let album = AlbumResolver::new(source)
            .resolve_album(&msg(5, Some(1)))
            .await;
        assert_eq!(ids(&album), vec![5]);
    }

    #[tokio::test]
    async fn lookup_error_ends_direction_and_is_counted() {
        let source = Arc::new(
            InMemorySource::new()
                .with_messages([msg(8, Some(3)), msg(10, Some(3)), msg(11, Some(3))])
                .with_failing_lookup(CH, 9),
        );
        let album = AlbumResolver::new(source).resolve(&msg(10, Some(3))).await;
        assert_eq!(ids(&album.members), vec![10, 11]);
        assert_eq!(album.lookup_errors, 1);
    }

    #[tokio::test]
    async fn backward_scan_stops_at_first_message_id() {
        let source = Arc::new(
            InMemorySource::new().with_messages([msg(1, Some(4)), msg(2, Some(4))]),
        );
        let album = AlbumResolver::new(source.clone())
            .resolve_album(&msg(2, Some(4)))
            .await;
        assert_eq!(ids(&album), vec![1, 2]);
    }
}
