//! Capability discovery over the type catalog.

use super::{function_id, is_excluded_method, lower_first, member_id, upper_first, Capability};
use crate::catalog::{TypeCatalog, TypeInfo};
use crate::types::TypeRef;
use std::sync::Arc;
use tracing::{debug, trace};

/// Every capability exported by `catalog`, in catalog order.
pub(super) fn scan_catalog(catalog: &TypeCatalog) -> Vec<Capability> {
    let mut capabilities = Vec::new();
    for assembly in catalog.assemblies() {
        for function in &assembly.functions {
            capabilities.push(Capability::from_method(
                function_id(&assembly.name, &function.name),
                Arc::clone(function),
                false,
            ));
        }
        for info in assembly.types.values() {
            if info.expose_properties {
                scan_properties(info, &mut capabilities);
            }
            if info.expose_methods {
                scan_methods(info, &mut capabilities);
            }
        }
        debug!("Scanned assembly {}", assembly.name);
    }
    capabilities
}

fn scan_properties(info: &TypeInfo, out: &mut Vec<Capability>) {
    for property in &info.properties {
        if !is_exportable_property(&property.ty) {
            trace!("Skipping property {}.{} of type {}", info.tag, property.name, property.ty);
            continue;
        }
        out.push(Capability::property_getter(
            member_id(&info.assembly, &info.name, &lower_first(&property.name)),
            property.clone(),
        ));
        if !property.is_read_only() {
            out.push(Capability::property_setter(
                member_id(
                    &info.assembly,
                    &info.name,
                    &format!("set{}", upper_first(&property.name)),
                ),
                property.clone(),
            ));
        }
    }
}

fn scan_methods(info: &TypeInfo, out: &mut Vec<Capability>) {
    for method in &info.methods {
        if is_excluded_method(&method.name) {
            continue;
        }
        out.push(Capability::from_method(
            member_id(&info.assembly, &info.name, &method.name),
            Arc::clone(method),
            true,
        ));
    }
}

/// Collections are reached through handles, and callback or token typed
/// properties have no wire form.
fn is_exportable_property(ty: &TypeRef) -> bool {
    !ty.is_collection() && ty.is_wire_compatible()
}
