//! Core network domain models.

pub mod access_point;
pub mod ap_list;
pub mod device;
