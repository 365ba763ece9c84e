//! BGZF split planning and mate-pair resortation for BAM-family alignment
//! files.
//!
//! The crate decomposes into six components, leaves first: a byte reader
//! over a local file ([`reader`]), a BGZF block codec ([`block`]), an
//! alignment header decoder ([`header`]), a record framer ([`record`]), a
//! parallel split planner ([`planner`]), and a mate-pair sorter
//! ([`sorter`]). [`parallel_reader`] composes the first four into one
//! independent record iterator per planner partition.

pub mod block;
pub mod error;
pub mod header;
pub mod index;
pub mod offset;
pub mod parallel_reader;
pub mod planner;
pub mod reader;
pub mod record;
pub mod sorter;

pub use block::BlockCodec;
pub use error::{CoreError, Result};
pub use header::Header;
pub use index::BlockIndex;
pub use offset::VirtualOffset;
pub use parallel_reader::ParallelReader;
pub use planner::{SplitPlan, SplitPlanner};
pub use reader::ByteReader;
pub use record::RecordFramer;
pub use sorter::PairSorter;
