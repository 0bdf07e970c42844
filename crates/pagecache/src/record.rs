//! Per-page state record moved between tiers

use pagestore::PageRecord;

use crate::codec::Payload;

/// Scroll anchor: first visible item and the offset within it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ScrollPosition {
    /// Index of the anchor item
    pub position: i32,
    /// Offset of the anchor item relative to the viewport start
    pub offset: i32,
}

impl ScrollPosition {
    /// Top of the content
    pub const TOP: ScrollPosition = ScrollPosition {
        position: 0,
        offset: 0,
    };

    /// Scroll anchor at `position` with `offset`
    pub fn new(position: i32, offset: i32) -> Self {
        Self { position, offset }
    }

    /// Whether this is the top of the content
    pub fn is_top(&self) -> bool {
        *self == Self::TOP
    }
}

/// One page's cached state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    /// Page tag
    pub tag: String,
    /// Business data snapshot
    pub payload: Option<Payload>,
    /// Scroll anchor, only trusted within the run that wrote it
    pub scroll: ScrollPosition,
    /// Pagination cursor
    pub page_index: u32,
    /// Epoch millis of the last save
    pub last_active: i64,
    /// Epoch millis the page was last hidden, 0 if not hidden
    pub last_hidden: i64,
}

impl StateRecord {
    /// Empty record for `tag`
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            payload: None,
            scroll: ScrollPosition::TOP,
            page_index: 1,
            last_active: 0,
            last_hidden: 0,
        }
    }

    /// Attach a payload
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set the scroll anchor
    pub fn with_scroll(mut self, scroll: ScrollPosition) -> Self {
        self.scroll = scroll;
        self
    }

    /// Set the pagination cursor
    pub fn with_page_index(mut self, page_index: u32) -> Self {
        self.page_index = page_index;
        self
    }

    /// Set the last-hidden timestamp
    pub fn with_last_hidden(mut self, millis: i64) -> Self {
        self.last_hidden = millis;
        self
    }

    /// Zero the scroll anchor, keeping everything else
    pub fn reset_scroll(&mut self) {
        self.scroll = ScrollPosition::TOP;
    }

    /// Convert to the persistent schema
    pub fn to_page_record(&self) -> PageRecord {
        let (payload, schema, format_version) = match &self.payload {
            Some(p) => (Some(p.bytes().to_vec()), p.schema().to_string(), p.format_version()),
            None => (None, String::new(), 0),
        };

        PageRecord {
            tag: self.tag.clone(),
            payload,
            schema,
            format_version,
            scroll_position: self.scroll.position,
            scroll_offset: self.scroll.offset,
            page_index: self.page_index,
            last_active: self.last_active,
            last_hidden: self.last_hidden,
        }
    }
}

impl From<PageRecord> for StateRecord {
    fn from(record: PageRecord) -> Self {
        let payload = record
            .payload
            .map(|bytes| Payload::from_parts(bytes, record.schema, record.format_version));

        Self {
            tag: record.tag,
            payload,
            scroll: ScrollPosition::new(record.scroll_position, record.scroll_offset),
            page_index: record.page_index,
            last_active: record.last_active,
            last_hidden: record.last_hidden,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let record = StateRecord::new("p");
        assert!(record.scroll.is_top());
        assert_eq!(record.page_index, 1);
        assert_eq!(record.last_hidden, 0);
    }

    #[test]
    fn test_page_record_conversion() {
        let record = StateRecord::new("tab/7")
            .with_payload(Payload::from_parts(b"[1]".to_vec(), "Vec<u32>".to_string(), 1))
            .with_scroll(ScrollPosition::new(12, -40))
            .with_page_index(4)
            .with_last_hidden(99);

        let stored = record.to_page_record();
        assert_eq!(stored.scroll_position, 12);
        assert_eq!(stored.scroll_offset, -40);
        assert_eq!(stored.schema, "Vec<u32>");

        assert_eq!(StateRecord::from(stored), record);
    }

    #[test]
    fn test_conversion_without_payload() {
        let record = StateRecord::new("empty");
        let back = StateRecord::from(record.to_page_record());
        assert!(back.payload.is_none());
    }
}
