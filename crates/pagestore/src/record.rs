//! On-disk page state record

/// One page's persisted state, keyed uniquely by `tag`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    /// Page tag (primary key)
    pub tag: String,
    /// Serialized business payload, if the page had one
    pub payload: Option<Vec<u8>>,
    /// Type tag of the payload
    pub schema: String,
    /// Codec format version of the payload
    pub format_version: u32,
    /// First visible item index
    pub scroll_position: i32,
    /// Offset within the first visible item
    pub scroll_offset: i32,
    /// Pagination cursor
    pub page_index: u32,
    /// Epoch millis of the last write
    pub last_active: i64,
    /// Epoch millis the page was last hidden, 0 if not hidden
    pub last_hidden: i64,
}

impl PageRecord {
    /// Create an empty record for `tag` with default cursors
    pub fn new(tag: impl Into<String>, last_active: i64) -> Self {
        Self {
            tag: tag.into(),
            payload: None,
            schema: String::new(),
            format_version: 0,
            scroll_position: 0,
            scroll_offset: 0,
            page_index: 1,
            last_active,
            last_hidden: 0,
        }
    }

    /// Copy of this record with scroll fields zeroed
    pub fn with_scroll_reset(&self) -> Self {
        Self {
            scroll_position: 0,
            scroll_offset: 0,
            ..self.clone()
        }
    }

    /// Whether `self` may replace `existing` under newest-wins
    pub fn supersedes(&self, existing: &PageRecord) -> bool {
        self.last_active >= existing.last_active
    }
}
