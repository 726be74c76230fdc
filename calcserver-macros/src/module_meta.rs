use darling::FromAttributes;
use syn::{DeriveInput, Fields, LitStr};

/// Parsed attributes from #[calc_module(...)]
#[derive(Debug, FromAttributes)]
#[darling(attributes(calc_module))]
pub struct ModuleArgs {
    pub type_tag: String,
}

/// Which reference set a field is resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Input,
    Coefficient,
    Output,
}

impl BindingKind {
    fn from_attr(attr: &syn::Attribute) -> Option<Self> {
        if attr.path().is_ident("input") {
            Some(Self::Input)
        } else if attr.path().is_ident("coefficient") {
            Some(Self::Coefficient)
        } else if attr.path().is_ident("output") {
            Some(Self::Output)
        } else {
            None
        }
    }

    /// Name of the `BlockBindings` accessor for this kind and key
    pub fn accessor(self, key: &BindingKey) -> String {
        let base = match self {
            Self::Input => "input",
            Self::Coefficient => "coefficient",
            Self::Output => "output",
        };
        match key {
            BindingKey::Code(_) => base.to_string(),
            BindingKey::Position(_) => format!("{}_at", base),
        }
    }
}

/// How a field finds its reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingKey {
    /// `#[input(code = "...")]`: by signal code
    Code(String),
    /// bare `#[input]`: by declaration order among fields of the same kind
    Position(usize),
}

pub struct ModuleField {
    pub ident: syn::Ident,
    /// `None` means `Default::default()`
    pub binding: Option<(BindingKind, BindingKey)>,
}

pub fn parse_module_info(input: &DeriveInput) -> darling::Result<ModuleArgs> {
    ModuleArgs::from_attributes(&input.attrs)
}

pub fn parse_fields(input: &DeriveInput) -> syn::Result<Vec<ModuleField>> {
    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            Fields::Unit => return Ok(Vec::new()),
            Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    &input.ident,
                    "CalcModule requires a struct with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "CalcModule can only be derived for structs",
            ))
        }
    };

    let mut positions = [0usize; 3];
    fields
        .iter()
        .map(|field| parse_field(field, &mut positions))
        .collect()
}

fn parse_field(field: &syn::Field, positions: &mut [usize; 3]) -> syn::Result<ModuleField> {
    let ident = field
        .ident
        .clone()
        .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;

    let mut binding = None;

    for attr in &field.attrs {
        let Some(kind) = BindingKind::from_attr(attr) else {
            continue;
        };

        if binding.is_some() {
            return Err(syn::Error::new_spanned(
                attr,
                "a field can carry only one of #[input], #[coefficient] or #[output]",
            ));
        }

        let mut code = None;
        if let syn::Meta::List(_) = &attr.meta {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("code") {
                    let lit: LitStr = meta.value()?.parse()?;
                    code = Some(lit.value());
                    Ok(())
                } else {
                    Err(meta.error("unsupported binding option, expected `code`"))
                }
            })?;
        }

        let key = match code {
            Some(code) => BindingKey::Code(code),
            None => {
                let slot = &mut positions[kind as usize];
                *slot += 1;
                BindingKey::Position(*slot - 1)
            }
        };
        binding = Some((kind, key));
    }

    Ok(ModuleField { ident, binding })
}
