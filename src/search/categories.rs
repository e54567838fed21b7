use once_cell::sync::Lazy;
use std::collections::HashMap;

/// A procurement modality the search can be narrowed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryDefinition {
    pub slug: &'static str,
    pub code: u32,
    pub label: &'static str,
    aliases: &'static [&'static str],
}

pub static CATEGORY_POOL: [CategoryDefinition; 5] = [
    CategoryDefinition {
        slug: "open-bid",
        code: 6,
        label: "Pregão - Eletrônico",
        aliases: &["pregao", "pregão", "pregao-eletronico"],
    },
    CategoryDefinition {
        slug: "competitive-bid",
        code: 4,
        label: "Concorrência - Eletrônica",
        aliases: &["concorrencia", "concorrência"],
    },
    CategoryDefinition {
        slug: "direct-award",
        code: 8,
        label: "Dispensa de Licitação",
        aliases: &["dispensa"],
    },
    CategoryDefinition {
        slug: "single-source",
        code: 9,
        label: "Inexigibilidade",
        aliases: &["inexigibilidade"],
    },
    CategoryDefinition {
        slug: "auction",
        code: 1,
        label: "Leilão - Eletrônico",
        aliases: &["leilao", "leilão"],
    },
];

/// Queried when no category, or an unknown one, is requested.
pub const DEFAULT_CODES: [u32; 3] = [6, 8, 4];

static CATEGORY_INDEX: Lazy<HashMap<String, &'static CategoryDefinition>> = Lazy::new(|| {
    let mut index = HashMap::new();
    for category in CATEGORY_POOL.iter() {
        index.insert(category.slug.to_string(), category);
        index.insert(category.code.to_string(), category);
        for alias in category.aliases {
            index.insert(alias.to_string(), category);
        }
    }
    index
});

pub fn lookup(raw: &str) -> Option<&'static CategoryDefinition> {
    let key = raw.trim().to_lowercase();
    CATEGORY_INDEX.get(&key).copied()
}

pub fn by_code(code: u32) -> Option<&'static CategoryDefinition> {
    CATEGORY_POOL.iter().find(|category| category.code == code)
}

/// Expands the requested category into the codes to query. Never empty.
pub fn resolve(requested: Option<&str>) -> Vec<&'static CategoryDefinition> {
    if let Some(category) = requested.and_then(lookup) {
        return vec![category];
    }
    DEFAULT_CODES.iter().filter_map(|code| by_code(*code)).collect()
}
