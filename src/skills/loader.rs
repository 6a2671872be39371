//! 技能加载器
//!
//! 从工作区 `skills/*/skill.toml` 读取技能元数据，渲染成 system prompt 中的技能摘要段落。
//! 单个技能解析失败只记录日志并跳过。

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// 技能元数据（skill.toml 的 [skill] 表）
#[derive(Debug, Clone, Deserialize)]
pub struct SkillMeta {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SkillToml {
    skill: SkillMeta,
}

#[derive(Debug, Clone)]
pub struct Skill {
    pub meta: SkillMeta,
    pub dir: PathBuf,
}

impl Skill {
    /// 单行摘要
    pub fn summary(&self) -> String {
        let mut line = format!("- [{}] {}: {}", self.meta.id, self.meta.name, self.meta.description);
        if !self.meta.tags.is_empty() {
            line.push_str(&format!(" (tags: {})", self.meta.tags.join(", ")));
        }
        line
    }
}

/// 技能加载器：绑定一个 skills 目录
pub struct SkillLoader {
    skills_dir: PathBuf,
}

impl SkillLoader {
    pub fn new(skills_dir: impl AsRef<Path>) -> Self {
        Self {
            skills_dir: skills_dir.as_ref().to_path_buf(),
        }
    }

    /// 工作区下的 skills 目录
    pub fn for_workspace(workspace: &Path) -> Self {
        Self::new(workspace.join("skills"))
    }

    /// 加载全部技能，按 id 排序
    pub fn load_all(&self) -> Vec<Skill> {
        let Ok(entries) = std::fs::read_dir(&self.skills_dir) else {
            return Vec::new();
        };
        let mut skills: Vec<Skill> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter_map(|dir| load_skill(&dir))
            .collect();
        skills.sort_by(|a, b| a.meta.id.cmp(&b.meta.id));
        tracing::debug!(dir = %self.skills_dir.display(), count = skills.len(), "skills loaded");
        skills
    }

    /// 技能摘要段落；没有技能时返回 None
    pub fn summary_section(&self) -> Option<String> {
        let skills = self.load_all();
        if skills.is_empty() {
            return None;
        }
        let lines: Vec<String> = skills.iter().map(Skill::summary).collect();
        Some(format!("## Skills\n\n{}\n", lines.join("\n")))
    }
}

fn load_skill(dir: &Path) -> Option<Skill> {
    let path = dir.join("skill.toml");
    let content = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<SkillToml>(&content) {
        Ok(data) => Some(Skill {
            meta: data.skill,
            dir: dir.to_path_buf(),
        }),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid skill.toml, skipped");
            None
        }
    }
}
