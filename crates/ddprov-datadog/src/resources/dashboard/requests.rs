//! Widget request schemas
//!
//! Every request carries the query union from [`super::common::queries`]
//! plus per-kind presentation fields. Scatterplot and hostmap requests are
//! objects keyed by axis (`x`/`y`, `fill`/`size`) rather than lists.

use super::common::{SORT_ORDERS, conditional_format, queries, request_style};
use ddprov_core::schema::{Field, Schema};

const AGGREGATORS: &[&str] = &["avg", "last", "max", "min", "sum", "percentile"];

pub fn timeseries() -> Schema {
    let style = request_style().fields([
        Field::string("line_type").omit_empty().one_of(&["dashed", "dotted", "solid"]),
        Field::string("line_width").omit_empty().one_of(&["normal", "thick", "thin"]),
    ]);
    queries().fields([
        Field::string("display_type").omit_empty().one_of(&["area", "bars", "line", "overlay"]),
        Field::bool("on_right_yaxis"),
        Field::block("style", style).omit_empty(),
        Field::string("metadata")
            .json_text()
            .describe("Expression aliases as JSON text, e.g. [{\"expression\": \"..\", \"alias_name\": \"..\"}]."),
    ])
}

pub fn toplist() -> Schema {
    queries().fields([
        Field::block_list("conditional_formats", conditional_format()).omit_empty(),
        Field::block("style", request_style()).omit_empty(),
    ])
}

pub fn query_value() -> Schema {
    queries().fields([
        Field::string("aggregator").omit_empty().one_of(AGGREGATORS),
        Field::block_list("conditional_formats", conditional_format()).omit_empty(),
    ])
}

pub fn heatmap() -> Schema {
    queries().field(Field::block("style", request_style()).omit_empty())
}

pub fn distribution() -> Schema {
    queries().field(Field::block("style", request_style()).omit_empty())
}

pub fn change() -> Schema {
    queries().fields([
        Field::string("change_type").omit_empty().one_of(&["absolute", "relative"]),
        Field::string("compare_to")
            .omit_empty()
            .one_of(&["hour_before", "day_before", "week_before", "month_before"]),
        Field::bool("increase_good"),
        Field::string("order_by").omit_empty().one_of(&["change", "name", "present", "past"]),
        Field::string("order_dir").omit_empty().one_of(SORT_ORDERS),
        Field::bool("show_present"),
    ])
}

/// `x` / `y` request pair
pub fn scatterplot() -> Schema {
    let axis_request = queries().field(Field::string("aggregator").omit_empty().one_of(AGGREGATORS));
    Schema::new().fields([
        Field::block("x", axis_request.clone()).omit_empty(),
        Field::block("y", axis_request).omit_empty(),
    ])
}

/// `fill` / `size` request pair
pub fn hostmap() -> Schema {
    Schema::new().fields([
        Field::block("fill", queries()).omit_empty(),
        Field::block("size", queries()).omit_empty(),
    ])
}
