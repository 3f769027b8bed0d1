//! Concrete migration tasks issued through the range workers.
//!
//! Every chunk statement here is an idempotent upsert (`ON CONFLICT DO
//! NOTHING` on the destination primary key), so re-executing a chunk after a
//! crash or resume never duplicates rows.

pub mod addresses;
pub mod partition_indexes;
pub mod repartition;
pub mod sequence_numbers;
pub mod table_addresses;
