// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_unit_value,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::bytes_nth,
    clippy::deprecated_clippy_cfg_attr,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

//! Multi-scale borders from social media co-location graphs.
//!
//! Users seen at several places link those places. The resulting graph is
//! filtered at a schedule of distance thresholds, clustered at each one,
//! and the borders between clusters are merged into one atlas keyed by
//! scale.

pub mod borders;
pub mod combine_borders;
pub mod communities;
pub mod confmodel;
pub mod crop_borders;
pub mod draw_map;
pub mod errors;
pub mod event_source;
pub mod filter_dists;
pub mod gen_graph;
pub mod geo_utils;
pub mod graph_formats;
pub mod locmap;
pub mod partition;
pub mod postgres_tools;
pub mod regions;
pub mod scale;
pub mod scales;
pub mod voronoi;

pub type LocationId = i64;
pub type UserId = i64;
