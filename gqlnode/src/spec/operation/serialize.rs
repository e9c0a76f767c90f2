//! Canonical operation text.
//!
//! The text is minified and fragment free: polymorphic fields select `__typename` first, then
//! their common selections, then one inline fragment per concrete type for the selections that
//! type adds.

use std::fmt;

use indexmap::IndexMap;

use super::OperationKind;
use super::VariableDefinition;
use crate::spec::Condition;
use crate::spec::IncludeSkip;
use crate::spec::QueriedField;
use crate::spec::TYPENAME;

pub(super) struct OperationText<'a> {
    pub(super) kind: OperationKind,
    pub(super) name: &'a str,
    pub(super) variables: &'a [VariableDefinition],
    pub(super) root: &'a QueriedField,
}

impl fmt::Display for OperationText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)?;
        if !self.variables.is_empty() {
            write!(f, "(")?;
            for (i, variable) in self.variables.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "${}:{}", variable.name, variable.ty)?;
                if let Some(default) = &variable.default {
                    write!(f, "={default}")?;
                }
            }
            write!(f, ")")?;
        }
        write_selections(f, &self.root.selections, &self.root.choices, false)
    }
}

fn write_selections(
    f: &mut fmt::Formatter<'_>,
    selections: &[QueriedField],
    choices: &IndexMap<String, Vec<QueriedField>>,
    is_abstract: bool,
) -> fmt::Result {
    write!(f, "{{")?;
    let mut separator = Separator::default();
    if is_abstract
        && !selections
            .iter()
            .any(|field| field.is_typename() && field.alias.is_none())
    {
        separator.write(f)?;
        write!(f, "{TYPENAME}")?;
    }
    for field in selections {
        separator.write(f)?;
        write_field(f, field)?;
    }
    for (type_name, choice) in choices {
        let mut added = choice
            .iter()
            .filter(|field| !selections.contains(field))
            .peekable();
        if added.peek().is_none() {
            continue;
        }
        separator.write(f)?;
        write!(f, "...on {type_name}{{")?;
        let mut inner = Separator::default();
        for field in added {
            inner.write(f)?;
            write_field(f, field)?;
        }
        write!(f, "}}")?;
    }
    write!(f, "}}")
}

fn write_field(f: &mut fmt::Formatter<'_>, field: &QueriedField) -> fmt::Result {
    if let Some(alias) = &field.alias {
        write!(f, "{alias}:")?;
    }
    write!(f, "{}", field.name)?;
    if !field.arguments.is_empty() {
        write!(f, "(")?;
        for (i, (name, value)) in field.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{name}:{value}")?;
        }
        write!(f, ")")?;
    }
    write_conditions(f, &field.include_skip)?;
    if field.kind.is_composite() {
        write_selections(
            f,
            &field.selections,
            &field.choices,
            field.kind.is_abstract(),
        )?;
    }
    Ok(())
}

fn write_conditions(f: &mut fmt::Formatter<'_>, include_skip: &IncludeSkip) -> fmt::Result {
    match include_skip.include() {
        Condition::Yes => {}
        Condition::No => write!(f, "@include(if:false)")?,
        Condition::Variable(name) => write!(f, "@include(if:${name})")?,
    }
    match include_skip.skip() {
        Condition::No => Ok(()),
        Condition::Yes => write!(f, "@skip(if:true)"),
        Condition::Variable(name) => write!(f, "@skip(if:${name})"),
    }
}

/// Writes a space before every item but the first.
#[derive(Default)]
struct Separator {
    started: bool,
}

impl Separator {
    fn write(&mut self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.started {
            write!(f, " ")?;
        }
        self.started = true;
        Ok(())
    }
}
