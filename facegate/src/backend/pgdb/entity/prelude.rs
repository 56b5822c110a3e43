//! 预导入模块
//! Prelude module

pub use super::devices::Entity as Devices;
pub use super::images::Entity as Images;
pub use super::jobs::Entity as Jobs;
pub use super::persons::Entity as Persons;
pub use super::records::Entity as Records;
pub use super::schedule_targets::Entity as ScheduleTargets;
pub use super::schedules::Entity as Schedules;
