use apollo_compiler::ast;
use apollo_compiler::parser::SourceMap;
use apollo_compiler::Node;
use indexmap::IndexMap;

use super::schema::find_cycles;
use crate::error::location_of;
use crate::error::CompileError;
use crate::error::CompileErrors;
use crate::spec::TypeRegistry;

/// Named fragments of every operation document, shared by all of their operations.
#[derive(Debug, Default, Clone)]
pub(crate) struct Fragments {
    map: IndexMap<String, Fragment>,
}

#[derive(Debug, Clone)]
pub(crate) struct Fragment {
    pub(crate) type_condition: String,
    pub(crate) definition: Node<ast::FragmentDefinition>,
}

impl Fragments {
    /// Collects the fragment definitions of the given documents.
    ///
    /// Fragments with an unknown type condition are left out; fragments spreading themselves,
    /// directly or not, are kept but reported.
    pub(crate) fn from_documents<'a>(
        documents: impl IntoIterator<Item = &'a ast::Document>,
        registry: &TypeRegistry,
        sources: &SourceMap,
        errors: &mut CompileErrors,
    ) -> Self {
        let mut map = IndexMap::new();
        for definition in documents
            .into_iter()
            .flat_map(|document| document.definitions.iter())
        {
            // Spec: https://spec.graphql.org/draft/#FragmentDefinition
            let ast::Definition::FragmentDefinition(fragment) = definition else {
                continue;
            };
            let name = fragment.name.to_string();
            if map.contains_key(&name) {
                errors.push(CompileError::DuplicateFragment {
                    name,
                    location: location_of(fragment, sources),
                });
                continue;
            }
            let type_condition = fragment.type_condition.to_string();
            if registry.get(&type_condition).is_none() {
                errors.push(CompileError::UnknownType {
                    name: type_condition,
                    location: location_of(fragment, sources),
                });
                continue;
            }
            map.insert(
                name,
                Fragment {
                    type_condition,
                    definition: fragment.clone(),
                },
            );
        }

        let fragments = Fragments { map };
        fragments.check_cycles(sources, errors);
        fragments
    }

    pub(crate) fn get(&self, key: impl AsRef<str>) -> Option<&Fragment> {
        self.map.get(key.as_ref())
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    fn check_cycles(&self, sources: &SourceMap, errors: &mut CompileErrors) {
        let edges = self
            .map
            .iter()
            .map(|(name, fragment)| {
                let mut spreads = Vec::new();
                collect_spreads(&fragment.definition.selection_set, &mut spreads);
                (name.as_str(), spreads)
            })
            .collect::<IndexMap<_, _>>();
        for cycle in find_cycles(&edges) {
            let Some(first) = cycle.first() else {
                continue;
            };
            errors.push(CompileError::CyclicFragment {
                name: first.to_string(),
                cycle: cycle.join(" -> "),
                location: self
                    .get(first)
                    .and_then(|fragment| location_of(&fragment.definition, sources)),
            });
        }
    }
}

fn collect_spreads<'a>(selections: &'a [ast::Selection], spreads: &mut Vec<&'a str>) {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => collect_spreads(&field.selection_set, spreads),
            ast::Selection::FragmentSpread(spread) => spreads.push(spread.fragment_name.as_str()),
            ast::Selection::InlineFragment(inline) => {
                collect_spreads(&inline.selection_set, spreads)
            }
        }
    }
}
