//! Turns the raw constant pool of a class file into its runtime form. Entries refer
//! to each other by index, possibly forward, so each entry is resolved on demand and
//! memoized; a visiting set rejects reference cycles.

use std::{collections::HashSet, sync::Arc};

use once_cell::sync::OnceCell;

use crate::{
    class::{self, decode_modified_utf8},
    descriptor::{FieldType, MethodDescriptor},
    error::{Error, Result},
    runtime::{
        ConstantPoolInfo, CpClassInfo, CpNameAndTypeInfo, Fieldref, Methodref, method_key,
    },
};

pub fn resolve_constant_pool(pool: &[class::ConstantPoolInfo]) -> Result<Vec<ConstantPoolInfo>> {
    let mut resolver = Resolver {
        raw: pool,
        resolved: (0..pool.len()).map(|_| None).collect(),
        visiting: HashSet::new(),
    };
    for i in 0..pool.len() {
        if !matches!(pool[i], class::ConstantPoolInfo::Empty) {
            resolver.ensure(i as u16 + 1)?;
        }
    }
    Ok(resolver
        .resolved
        .into_iter()
        .map(|entry| entry.unwrap_or(ConstantPoolInfo::Empty))
        .collect())
}

struct Resolver<'a> {
    raw: &'a [class::ConstantPoolInfo],
    resolved: Vec<Option<ConstantPoolInfo>>,
    visiting: HashSet<u16>,
}

impl Resolver<'_> {
    fn ensure(&mut self, index: u16) -> Result<()> {
        let slot = self.slot(index)?;
        if self.resolved[slot].is_some() {
            return Ok(());
        }
        if !self.visiting.insert(index) {
            return Err(Error::unresolved(index, "reference cycle"));
        }
        let raw = self.raw;
        let entry = self.resolve_entry(index, &raw[slot]);
        self.visiting.remove(&index);
        self.resolved[slot] = Some(entry?);
        Ok(())
    }

    fn slot(&self, index: u16) -> Result<usize> {
        let slot = (index as usize)
            .checked_sub(1)
            .ok_or_else(|| Error::unresolved(index, "index 0 is not a constant"))?;
        match self.raw.get(slot) {
            None => Err(Error::unresolved(
                index,
                format!("out of range (pool has {} entries)", self.raw.len()),
            )),
            Some(class::ConstantPoolInfo::Empty) => {
                Err(Error::unresolved(index, "refers to an unusable slot"))
            }
            Some(_) => Ok(slot),
        }
    }

    /// Resolves `index` on behalf of entry `from`.
    fn target(&mut self, from: u16, index: u16) -> Result<&ConstantPoolInfo> {
        self.ensure(index).map_err(|e| match e {
            Error::UnresolvedConstant { index: inner, reason } if inner == index => {
                Error::unresolved(from, format!("#{index} {reason}"))
            }
            other => other,
        })?;
        let slot = self.slot(index)?;
        self.resolved[slot]
            .as_ref()
            .ok_or_else(|| Error::unresolved(from, format!("#{index} is unresolved")))
    }

    fn utf8(&mut self, from: u16, index: u16) -> Result<Arc<str>> {
        match self.target(from, index)? {
            ConstantPoolInfo::Utf8(s) => Ok(Arc::clone(s)),
            other => Err(Error::unresolved(
                from,
                format!("#{index} is {}, expected Utf8", other.kind()),
            )),
        }
    }

    fn class(&mut self, from: u16, index: u16) -> Result<CpClassInfo> {
        match self.target(from, index)? {
            ConstantPoolInfo::Class(info) => Ok(info.clone()),
            other => Err(Error::unresolved(
                from,
                format!("#{index} is {}, expected Class", other.kind()),
            )),
        }
    }

    fn name_and_type(&mut self, from: u16, index: u16) -> Result<CpNameAndTypeInfo<Arc<str>>> {
        match self.target(from, index)? {
            ConstantPoolInfo::NameAndType(info) => Ok(info.clone()),
            other => Err(Error::unresolved(
                from,
                format!("#{index} is {}, expected NameAndType", other.kind()),
            )),
        }
    }

    fn field_name_and_type(&mut self, from: u16, index: u16) -> Result<CpNameAndTypeInfo<FieldType>> {
        let CpNameAndTypeInfo { name, descriptor } = self.name_and_type(from, index)?;
        let descriptor = FieldType::parse(&descriptor)
            .ok_or_else(|| Error::unresolved(from, format!("bad field descriptor {descriptor}")))?;
        Ok(CpNameAndTypeInfo { name, descriptor })
    }

    fn method_name_and_type(
        &mut self,
        from: u16,
        index: u16,
    ) -> Result<(CpNameAndTypeInfo<MethodDescriptor>, Arc<str>)> {
        let CpNameAndTypeInfo { name, descriptor } = self.name_and_type(from, index)?;
        let parsed = MethodDescriptor::parse(&descriptor)
            .ok_or_else(|| Error::unresolved(from, format!("bad method descriptor {descriptor}")))?;
        Ok((
            CpNameAndTypeInfo {
                name,
                descriptor: parsed,
            },
            descriptor,
        ))
    }

    fn method_ref(&mut self, from: u16, class_index: u16, name_and_type_index: u16) -> Result<Methodref> {
        let class = self.class(from, class_index)?;
        let (name_and_type, descriptor_str) = self.method_name_and_type(from, name_and_type_index)?;
        let key = method_key(&name_and_type.name, &descriptor_str).into();
        Ok(Methodref {
            class,
            name_and_type,
            descriptor_str,
            key,
            resolve: OnceCell::new(),
        })
    }

    fn resolve_entry(&mut self, index: u16, raw: &class::ConstantPoolInfo) -> Result<ConstantPoolInfo> {
        type Raw = class::ConstantPoolInfo;
        type Cpi = ConstantPoolInfo;
        let entry = match *raw {
            Raw::Empty => Cpi::Empty,
            Raw::Utf8(ref bytes) => {
                let s = decode_modified_utf8(bytes)
                    .ok_or_else(|| Error::unresolved(index, "invalid modified UTF-8"))?;
                Cpi::Utf8(s.into())
            }
            Raw::Integer(v) => Cpi::Integer(v),
            Raw::Float(v) => Cpi::Float(v),
            Raw::Long(v) => Cpi::Long(v),
            Raw::Double(v) => Cpi::Double(v),
            Raw::Class { name_index } => Cpi::Class(CpClassInfo::new(self.utf8(index, name_index)?)),
            Raw::String { string_index } => Cpi::String(self.utf8(index, string_index)?),
            Raw::Fieldref {
                class_index,
                name_and_type_index,
            } => Cpi::Fieldref(Fieldref {
                class: self.class(index, class_index)?,
                name_and_type: self.field_name_and_type(index, name_and_type_index)?,
                resolve: OnceCell::new(),
            }),
            Raw::Methodref {
                class_index,
                name_and_type_index,
            } => Cpi::Methodref(self.method_ref(index, class_index, name_and_type_index)?),
            Raw::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => Cpi::InterfaceMethodref(self.method_ref(index, class_index, name_and_type_index)?),
            Raw::NameAndType {
                name_index,
                descriptor_index,
            } => Cpi::NameAndType(CpNameAndTypeInfo {
                name: self.utf8(index, name_index)?,
                descriptor: self.utf8(index, descriptor_index)?,
            }),
            Raw::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                let expected_member = match reference_kind {
                    1..=4 => matches!(self.target(index, reference_index)?, Cpi::Fieldref(_)),
                    5..=9 => matches!(
                        self.target(index, reference_index)?,
                        Cpi::Methodref(_) | Cpi::InterfaceMethodref(_)
                    ),
                    _ => {
                        return Err(Error::unresolved(
                            index,
                            format!("bad reference kind {reference_kind}"),
                        ));
                    }
                };
                if !expected_member {
                    return Err(Error::unresolved(
                        index,
                        format!("#{reference_index} does not match reference kind {reference_kind}"),
                    ));
                }
                Cpi::MethodHandle {
                    reference_kind,
                    reference_index,
                }
            }
            Raw::MethodType { descriptor_index } => {
                let descriptor = self.utf8(index, descriptor_index)?;
                Cpi::MethodType(MethodDescriptor::parse(&descriptor).ok_or_else(|| {
                    Error::unresolved(index, format!("bad method descriptor {descriptor}"))
                })?)
            }
            Raw::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => Cpi::Dynamic {
                bootstrap_method_attr_index,
                name_and_type: self.field_name_and_type(index, name_and_type_index)?,
            },
            Raw::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => Cpi::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type: self.method_name_and_type(index, name_and_type_index)?.0,
            },
            Raw::Module { name_index } => Cpi::Module(self.utf8(index, name_index)?),
            Raw::Package { name_index } => Cpi::Package(self.utf8(index, name_index)?),
        };
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ConstantPoolInfo as Raw;

    fn utf8(s: &str) -> Raw {
        Raw::Utf8(s.as_bytes().to_vec())
    }

    #[test]
    fn test_forward_references() {
        let pool = vec![
            Raw::Methodref {
                class_index: 2,
                name_and_type_index: 4,
            },
            Raw::Class { name_index: 3 },
            utf8("Foo"),
            Raw::NameAndType {
                name_index: 5,
                descriptor_index: 6,
            },
            utf8("bar"),
            utf8("(IJ)V"),
            Raw::Long(7),
            Raw::Empty,
        ];
        let resolved = resolve_constant_pool(&pool).unwrap();
        assert_eq!(resolved.len(), pool.len());
        let ConstantPoolInfo::Methodref(method) = &resolved[0] else {
            panic!("expected a method ref");
        };
        assert_eq!(method.class.name.as_ref(), "Foo");
        assert_eq!(method.name_and_type.name.as_ref(), "bar");
        assert_eq!(method.name_and_type.descriptor.parameters.len(), 2);
        assert_eq!(method.key.as_ref(), "bar(IJ)V");
        assert!(matches!(resolved[6], ConstantPoolInfo::Long(7)));
        assert!(matches!(resolved[7], ConstantPoolInfo::Empty));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let pool = vec![Raw::Class { name_index: 1 }];
        let err = resolve_constant_pool(&pool).unwrap_err();
        let Error::UnresolvedConstant { index, reason } = err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(index, 1);
        assert!(reason.contains("cycle"), "{reason}");
    }

    #[test]
    fn test_type_mismatch() {
        let pool = vec![Raw::Class { name_index: 2 }, Raw::Integer(3)];
        let err = resolve_constant_pool(&pool).unwrap_err();
        assert!(
            matches!(&err, Error::UnresolvedConstant { index: 1, reason } if reason.contains("expected Utf8")),
            "{err:?}"
        );
    }

    #[test]
    fn test_dangling_and_zero_indices() {
        let dangling = vec![Raw::String { string_index: 9 }];
        assert!(matches!(
            resolve_constant_pool(&dangling),
            Err(Error::UnresolvedConstant { index: 1, .. })
        ));

        let zero = vec![Raw::String { string_index: 0 }];
        assert!(matches!(
            resolve_constant_pool(&zero),
            Err(Error::UnresolvedConstant { index: 1, .. })
        ));

        let into_wide_filler = vec![Raw::Double(1.0), Raw::Empty, Raw::String { string_index: 2 }];
        assert!(matches!(
            resolve_constant_pool(&into_wide_filler),
            Err(Error::UnresolvedConstant { index: 3, .. })
        ));
    }

    #[test]
    fn test_bad_descriptor() {
        let pool = vec![
            Raw::Fieldref {
                class_index: 2,
                name_and_type_index: 4,
            },
            Raw::Class { name_index: 3 },
            utf8("Foo"),
            Raw::NameAndType {
                name_index: 3,
                descriptor_index: 5,
            },
            utf8("Q"),
        ];
        assert!(matches!(
            resolve_constant_pool(&pool),
            Err(Error::UnresolvedConstant { index: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let pool = vec![Raw::Utf8(vec![0xff])];
        assert!(matches!(
            resolve_constant_pool(&pool),
            Err(Error::UnresolvedConstant { index: 1, .. })
        ));
    }
}
