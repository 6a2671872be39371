//! 技能系统：工作区技能发现与摘要

pub mod loader;

pub use loader::{Skill, SkillLoader, SkillMeta};
