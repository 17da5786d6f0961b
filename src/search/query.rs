//! Structured search requests and their translation into store-native
//! queries.
//!
//! The builder turns a [`SearchQuery`] into one parameterized statement per
//! collection: every present filter contributes exactly one ANDed predicate,
//! absent filters are omitted entirely (never compared against null), and
//! list-valued filters expand to OR groups with uniquely numbered parameters.

use chrono::{DateTime, Utc};

use crate::config::HistoryConfig;
use crate::error::{Result, StoreError};
use crate::model::{SenderRole, format_timestamp, normalize_search_text};
use crate::store::{Collection, ParamValue, StoreQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Sortable fields. `LastActivity` maps to the last-message timestamp on
/// conversations and the message timestamp on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortField {
    #[default]
    LastActivity,
    CreatedAt,
    MessageCount,
    Timestamp,
    SequenceNumber,
}

/// An immutable search request.
///
/// `tenant_id` is mandatory; everything else is optional and simply absent
/// from the generated query when unset. `page_size` of zero means "use the
/// configured default".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    pub tenant_id: String,
    pub keyword: Option<String>,
    /// Pins the messages partition when set; also matches the conversation
    /// document's own id on the conversations collection.
    pub conversation_id: Option<String>,
    pub participant_ids: Vec<String>,
    pub sender_roles: Vec<SenderRole>,
    pub category_ids: Vec<String>,
    pub tags: Vec<String>,
    /// Processing-mode filter (message metadata).
    pub modes: Vec<String>,
    pub date_start: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
    pub page_size: usize,
    /// Opaque cursor from a prior page; must be passed back unmodified.
    pub continuation: Option<String>,
    pub include_archived: bool,
}

impl SearchQuery {
    pub fn for_tenant(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            keyword: None,
            conversation_id: None,
            participant_ids: Vec::new(),
            sender_roles: Vec::new(),
            category_ids: Vec::new(),
            tags: Vec::new(),
            modes: Vec::new(),
            date_start: None,
            date_end: None,
            sort_field: SortField::default(),
            sort_order: SortOrder::default(),
            page_size: 0,
            continuation: None,
            include_archived: false,
        }
    }

    /// Keyword after trimming; an empty string means "no keyword filter".
    fn effective_keyword(&self) -> Option<&str> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Accumulates predicates and their parameters in lockstep, so the emitted
/// statement and the parameter list can never drift apart.
struct PredicateSet {
    conditions: Vec<String>,
    params: Vec<(String, ParamValue)>,
}

impl PredicateSet {
    fn new() -> Self {
        Self {
            conditions: Vec::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, condition: String) {
        self.conditions.push(condition);
    }

    fn bind(&mut self, name: &str, value: ParamValue) {
        self.params.push((name.to_string(), value));
    }

    /// OR group over one predicate per value, each with a uniquely numbered
    /// parameter, the group ANDed with the rest.
    fn push_or_group<F>(&mut self, prefix: &str, values: &[String], predicate: F)
    where
        F: Fn(&str) -> String,
    {
        if values.is_empty() {
            return;
        }
        let mut branches = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            let name = format!("@{prefix}{i}");
            branches.push(predicate(&name));
            self.bind(&name, ParamValue::Text(value.clone()));
        }
        self.push(format!("({})", branches.join(" OR ")));
    }
}

pub struct QueryBuilder {
    conversations_table: String,
    messages_table: String,
}

impl QueryBuilder {
    pub fn new(cfg: &HistoryConfig) -> Self {
        Self {
            conversations_table: cfg.conversations_collection.clone(),
            messages_table: cfg.messages_collection.clone(),
        }
    }

    /// Translate `query` for `target`, choosing field names and operators per
    /// collection.
    pub fn build(&self, query: &SearchQuery, target: Collection) -> Result<StoreQuery> {
        if query.tenant_id.trim().is_empty() {
            return Err(StoreError::InvalidQuery(
                "tenant id is required for any search".into(),
            ));
        }
        match target {
            Collection::Conversations => Ok(self.build_conversations(query)),
            Collection::Messages => Ok(self.build_messages(query)),
        }
    }

    /// Conversations whose title contains `partial`, most recent activity
    /// first. Feeds typeahead suggestions; titles are deduplicated by the
    /// caller.
    pub fn build_title_suggestions(&self, tenant_id: &str, partial: &str) -> StoreQuery {
        StoreQuery {
            sql: format!(
                "SELECT c.doc FROM {table} c WHERE c.pk = @tenantId \
                 AND instr(lower(json_extract(c.doc, '$.title')), @partial) > 0 \
                 ORDER BY json_extract(c.doc, '$.timeline.lastMessageAt') DESC, c.id DESC",
                table = self.conversations_table,
            ),
            params: vec![
                ("@tenantId".into(), ParamValue::Text(tenant_id.to_string())),
                ("@partial".into(), ParamValue::Text(partial.to_lowercase())),
            ],
            partition_pinned: true,
        }
    }

    /// Every conversation of one tenant, archived included. Facet
    /// aggregation walks this page by page.
    pub fn build_tenant_scan(&self, tenant_id: &str) -> StoreQuery {
        StoreQuery {
            sql: format!(
                "SELECT c.doc FROM {table} c WHERE c.pk = @tenantId ORDER BY c.id",
                table = self.conversations_table,
            ),
            params: vec![("@tenantId".into(), ParamValue::Text(tenant_id.to_string()))],
            partition_pinned: true,
        }
    }

    fn build_conversations(&self, query: &SearchQuery) -> StoreQuery {
        let mut set = PredicateSet::new();

        // Partition key: every conversation search is pinned to one tenant.
        set.push("c.pk = @tenantId".into());
        set.bind("@tenantId", ParamValue::Text(query.tenant_id.clone()));

        if let Some(keyword) = query.effective_keyword() {
            // One parameter reused across title OR summary OR last preview.
            set.push(
                "(instr(lower(json_extract(c.doc, '$.title')), @keyword) > 0 \
                 OR instr(lower(json_extract(c.doc, '$.summary')), @keyword) > 0 \
                 OR instr(lower(json_extract(c.doc, '$.timeline.lastMessagePreview')), @keyword) > 0)"
                    .into(),
            );
            set.bind("@keyword", ParamValue::Text(keyword.to_lowercase()));
        }

        if let Some(conversation_id) = &query.conversation_id {
            set.push("json_extract(c.doc, '$.conversationId') = @conversationId".into());
            set.bind(
                "@conversationId",
                ParamValue::Text(conversation_id.clone()),
            );
        }

        set.push_or_group("participant", &query.participant_ids, |name| {
            format!(
                "EXISTS (SELECT 1 FROM json_each(c.doc, '$.participants') p \
                 WHERE json_extract(p.value, '$.userId') = {name})"
            )
        });

        let role_labels: Vec<String> = query
            .sender_roles
            .iter()
            .map(|r| r.as_str().to_string())
            .collect();
        set.push_or_group("role", &role_labels, |name| {
            format!(
                "EXISTS (SELECT 1 FROM json_each(c.doc, '$.participants') p \
                 WHERE json_extract(p.value, '$.role') = {name})"
            )
        });

        set.push_or_group("category", &query.category_ids, |name| {
            format!(
                "EXISTS (SELECT 1 FROM json_each(c.doc, '$.categories') cat \
                 WHERE json_extract(cat.value, '$.categoryId') = {name})"
            )
        });

        set.push_or_group("tag", &query.tags, |name| {
            format!("EXISTS (SELECT 1 FROM json_each(c.doc, '$.tags') t WHERE t.value = {name})")
        });

        // Date bounds apply independently; a query may supply only one.
        if let Some(start) = query.date_start {
            set.push("json_extract(c.doc, '$.timeline.lastMessageAt') >= @startDate".into());
            set.bind("@startDate", ParamValue::Text(format_timestamp(start)));
        }
        if let Some(end) = query.date_end {
            set.push("json_extract(c.doc, '$.timeline.lastMessageAt') <= @endDate".into());
            set.bind("@endDate", ParamValue::Text(format_timestamp(end)));
        }

        if !query.include_archived {
            set.push("coalesce(json_extract(c.doc, '$.archived'), 0) = 0".into());
        }

        let sort_expr = match query.sort_field {
            SortField::CreatedAt => "json_extract(c.doc, '$.timeline.createdAt')",
            SortField::MessageCount => "json_extract(c.doc, '$.metrics.messageCount')",
            _ => "json_extract(c.doc, '$.timeline.lastMessageAt')",
        };
        let ord = query.sort_order.keyword();

        StoreQuery {
            sql: format!(
                "SELECT c.doc FROM {table} c WHERE {conditions} ORDER BY {sort_expr} {ord}, c.id {ord}",
                table = self.conversations_table,
                conditions = set.conditions.join(" AND "),
            ),
            params: set.params,
            partition_pinned: true,
        }
    }

    fn build_messages(&self, query: &SearchQuery) -> StoreQuery {
        let mut set = PredicateSet::new();

        set.push("json_extract(m.doc, '$.tenantId') = @tenantId".into());
        set.bind("@tenantId", ParamValue::Text(query.tenant_id.clone()));

        // Equality on the partition key keeps this query single-partition.
        let partition_pinned = query.conversation_id.is_some();
        if let Some(conversation_id) = &query.conversation_id {
            set.push("m.pk = @conversationId".into());
            set.bind(
                "@conversationId",
                ParamValue::Text(conversation_id.clone()),
            );
        }

        if let Some(keyword) = query.effective_keyword() {
            // Messages match only the precomputed normalized text.
            set.push("instr(json_extract(m.doc, '$.content.searchableText'), @keyword) > 0".into());
            set.bind(
                "@keyword",
                ParamValue::Text(normalize_search_text(keyword)),
            );
        }

        set.push_or_group("participant", &query.participant_ids, |name| {
            format!("json_extract(m.doc, '$.sender.userId') = {name}")
        });

        let role_labels: Vec<String> = query
            .sender_roles
            .iter()
            .map(|r| r.as_str().to_string())
            .collect();
        set.push_or_group("role", &role_labels, |name| {
            format!("json_extract(m.doc, '$.sender.role') = {name}")
        });

        set.push_or_group("mode", &query.modes, |name| {
            format!("json_extract(m.doc, '$.metadata.mode') = {name}")
        });

        if let Some(start) = query.date_start {
            set.push("json_extract(m.doc, '$.timestamp') >= @startDate".into());
            set.bind("@startDate", ParamValue::Text(format_timestamp(start)));
        }
        if let Some(end) = query.date_end {
            set.push("json_extract(m.doc, '$.timestamp') <= @endDate".into());
            set.bind("@endDate", ParamValue::Text(format_timestamp(end)));
        }

        let sort_expr = match query.sort_field {
            SortField::SequenceNumber => "json_extract(m.doc, '$.sequenceNumber')",
            _ => "json_extract(m.doc, '$.timestamp')",
        };
        let ord = query.sort_order.keyword();

        StoreQuery {
            sql: format!(
                "SELECT m.doc FROM {table} m WHERE {conditions} ORDER BY {sort_expr} {ord}, m.id {ord}",
                table = self.messages_table,
                conditions = set.conditions.join(" AND "),
            ),
            params: set.params,
            partition_pinned,
        }
    }
}
