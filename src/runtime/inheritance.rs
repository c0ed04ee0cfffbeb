use std::sync::Arc;

use crate::{consts::OBJECT_CLASS, runtime::Class};

/// Whether a value of class `source` can be stored where `target` is expected.
pub(crate) fn is_assignable_to(source: &Arc<Class>, target: &Arc<Class>) -> bool {
    if source.is_array() {
        is_array_assignable_to(source, target)
    } else if target.is_interface() {
        source.class_name == target.class_name || is_class_implements(source, target)
    } else {
        is_same_or_sub_class_of(source, target)
    }
}

/// source: an array class
fn is_array_assignable_to(source: &Arc<Class>, target: &Arc<Class>) -> bool {
    if !target.is_array() {
        // arrays implement no interfaces here
        return target.class_name.as_ref() == OBJECT_CLASS;
    }
    let (Some(source_type), Some(target_type)) = (&source.array_component, &target.array_component)
    else {
        return false;
    };
    if !source_type.is_reference() || !target_type.is_reference() {
        return source_type == target_type;
    }
    match (&source.array_element_class, &target.array_element_class) {
        (Some(source_element), Some(target_element)) => is_assignable_to(source_element, target_element),
        _ => false,
    }
}

pub(in crate::runtime) fn is_class_implements(class: &Arc<Class>, interface: &Arc<Class>) -> bool {
    for class_intf in &class.interfaces {
        if class_intf.class_name == interface.class_name || is_class_implements(class_intf, interface) {
            return true;
        }
    }
    if let Some(super_class) = &class.super_class {
        return is_class_implements(super_class, interface);
    }
    false
}

pub(in crate::runtime) fn is_same_or_sub_class_of(source: &Arc<Class>, target: &Arc<Class>) -> bool {
    if source.class_name == target.class_name {
        return true;
    }
    if let Some(super_class) = &source.super_class {
        return is_same_or_sub_class_of(super_class, target);
    }
    false
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        class::ClassBuilder,
        consts::{ClassAccessFlag, STRING_CLASS},
        runtime::Runtime,
    };

    fn runtime() -> Runtime {
        let i = ClassBuilder::new("I", Some(OBJECT_CLASS))
            .access_flags(ClassAccessFlag::PUBLIC | ClassAccessFlag::INTERFACE | ClassAccessFlag::ABSTRACT)
            .to_bytes()
            .unwrap();
        let a = ClassBuilder::new("A", Some(OBJECT_CLASS))
            .interface("I")
            .to_bytes()
            .unwrap();
        let b = ClassBuilder::new("B", Some("A")).to_bytes().unwrap();
        Runtime::builder()
            .class("I", i)
            .class("A", a)
            .class("B", b)
            .build()
            .unwrap()
    }

    #[test]
    fn test_class_assignability() {
        let runtime = runtime();
        let class = |name| runtime.load_class(name).unwrap();
        assert!(is_assignable_to(&class("B"), &class("A")));
        assert!(is_assignable_to(&class("B"), &class("I")));
        assert!(is_assignable_to(&class("B"), &class(OBJECT_CLASS)));
        assert!(is_assignable_to(&class("I"), &class("I")));
        assert!(!is_assignable_to(&class("A"), &class("B")));
        assert!(!is_assignable_to(&class(STRING_CLASS), &class("I")));
    }

    #[test]
    fn test_array_assignability() {
        let runtime = runtime();
        let class = |name| runtime.load_class(name).unwrap();
        assert!(is_assignable_to(&class("[LB;"), &class("[LA;")));
        assert!(is_assignable_to(&class("[LB;"), &class("[LI;")));
        assert!(is_assignable_to(&class("[[LB;"), &class("[Ljava/lang/Object;")));
        assert!(is_assignable_to(&class("[I"), &class(OBJECT_CLASS)));
        assert!(!is_assignable_to(&class("[I"), &class("[J")));
        assert!(!is_assignable_to(&class("[I"), &class("[Ljava/lang/Object;")));
        assert!(!is_assignable_to(&class("[LA;"), &class("[LB;")));
        assert!(!is_assignable_to(&class("[LA;"), &class("I")));
    }
}
