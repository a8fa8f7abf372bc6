//! Sub-schemas shared by several widget kinds
//!
//! Each function returns a fresh [`Schema`]; widget schemas layer them
//! with [`Schema::merge`].

use ddprov_core::schema::{Field, Schema};

pub(crate) const ALIGNMENTS: &[&str] = &["center", "left", "right"];
pub(crate) const VERTICAL_ALIGNMENTS: &[&str] = &["center", "top", "bottom"];
pub(crate) const SORT_ORDERS: &[&str] = &["asc", "desc"];
pub(crate) const LIVE_SPANS: &[&str] = &[
    "1m", "5m", "10m", "15m", "30m", "1h", "4h", "1d", "2d", "1w", "1mo", "3mo", "6mo", "1y", "alert", "week_to_date",
    "month_to_date",
];

/// `title`, `title_size`, `title_align`
pub fn titled() -> Schema {
    Schema::new().fields([
        Field::string("title").omit_empty().describe("The title of the widget."),
        Field::string("title_size").omit_empty().describe("The size of the widget's title."),
        Field::string("title_align").omit_empty().one_of(ALIGNMENTS),
    ])
}

/// Widget time window, `{"time": {"live_span": ..}}` on the wire
pub fn live_span() -> Schema {
    Schema::new().field(
        Field::string("live_span")
            .wire_path("time.live_span")
            .omit_empty()
            .one_of(LIVE_SPANS)
            .describe("The timeframe to use when displaying the widget."),
    )
}

/// Title fields, live span and custom links
pub fn common() -> Schema {
    titled().merge(live_span()).field(custom_links())
}

pub fn custom_links() -> Field {
    Field::block_list(
        "custom_link",
        Schema::new().fields([
            Field::string("label").omit_empty(),
            Field::string("link").required(),
            Field::bool("is_hidden").omit_empty(),
            Field::string("override_label").omit_empty(),
        ]),
    )
    .wire_key("custom_links")
    .omit_empty()
}

pub fn axis() -> Schema {
    Schema::new().fields([
        Field::string("label").omit_empty(),
        Field::string("min").omit_empty(),
        Field::string("max").omit_empty(),
        Field::string("scale").omit_empty(),
        Field::bool("include_zero"),
    ])
}

pub fn marker() -> Schema {
    Schema::new().fields([
        Field::string("value").required(),
        Field::string("display_type").omit_empty(),
        Field::string("label").omit_empty(),
    ])
}

pub fn event() -> Schema {
    Schema::new().fields([Field::string("q").required(), Field::string("tags_execution").omit_empty()])
}

pub fn request_style() -> Schema {
    Schema::new().field(Field::string("palette").omit_empty())
}

pub fn conditional_format() -> Schema {
    Schema::new().fields([
        Field::string("comparator").required().one_of(&["<", "<=", ">", ">="]),
        Field::float("value").required(),
        Field::string("palette").required(),
        Field::string("custom_bg_color").omit_empty(),
        Field::string("custom_fg_color").omit_empty(),
        Field::string("image_url").omit_empty(),
        Field::bool("hide_value"),
        Field::string("timeframe").omit_empty(),
        Field::string("metric").omit_empty(),
    ])
}

/// Event-platform query (logs, APM, RUM, security signals)
///
/// `compute_query` and `search_query` are spelled differently on the wire
/// (`compute`, `search.query`).
pub fn log_query() -> Schema {
    let compute = Schema::new().fields([
        Field::string("aggregation").required(),
        Field::string("facet").omit_empty(),
        Field::int("interval").omit_empty(),
    ]);
    let sort = Schema::new().fields([
        Field::string("aggregation").required(),
        Field::string("order").required().one_of(SORT_ORDERS),
        Field::string("facet").omit_empty(),
    ]);
    let group_by = Schema::new().fields([
        Field::string("facet"),
        Field::int("limit").omit_empty(),
        Field::block("sort_query", sort).wire_key("sort").omit_empty(),
    ]);

    Schema::new().fields([
        Field::string("index").required(),
        Field::string("search_query").wire_path("search.query").omit_empty(),
        Field::block("compute_query", compute.clone()).wire_key("compute").omit_empty(),
        Field::block_list("multi_compute", compute).omit_empty(),
        Field::block_list("group_by", group_by).omit_empty(),
    ])
}

pub fn process_query() -> Schema {
    Schema::new().fields([
        Field::string("metric").required(),
        Field::string("search_by").omit_empty(),
        Field::string_list("filter_by").omit_empty(),
        Field::int("limit").omit_empty(),
    ])
}

/// Keys of the request query union, in priority order
pub const QUERY_KEYS: &[&str] = &["q", "apm_query", "log_query", "process_query", "rum_query", "security_query"];

/// Request query union: a metric string or one query block
pub fn queries() -> Schema {
    Schema::new()
        .fields([
            Field::string("q").omit_empty().describe("The metric query to use for this widget."),
            Field::block("apm_query", log_query()).omit_empty(),
            Field::block("log_query", log_query()).omit_empty(),
            Field::block("process_query", process_query()).omit_empty(),
            Field::block("rum_query", log_query()).omit_empty(),
            Field::block("security_query", log_query()).omit_empty(),
        ])
        .exactly_one_of(QUERY_KEYS)
}
