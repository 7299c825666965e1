//! Kind-dispatched traversal over a build file.
//!
//! [`walk_element`] routes each element to the matching `visit_*` method;
//! every method defaults to [`ElementVisitor::visit_element`], which in turn
//! defaults to walking the children. Implementors override only the kinds
//! they care about and keep the recursion by delegating back.

use crate::document::{BuildFile, ElementId, ElementKind};

pub trait ElementVisitor {
    fn visit_element(&mut self, file: &BuildFile, element: ElementId) {
        walk_children(file, element, self);
    }

    fn visit_project(&mut self, file: &BuildFile, element: ElementId) {
        self.visit_element(file, element);
    }

    fn visit_target(&mut self, file: &BuildFile, element: ElementId) {
        self.visit_element(file, element);
    }

    fn visit_import(&mut self, file: &BuildFile, element: ElementId) {
        self.visit_element(file, element);
    }

    fn visit_include(&mut self, file: &BuildFile, element: ElementId) {
        self.visit_element(file, element);
    }

    fn visit_property(&mut self, file: &BuildFile, element: ElementId) {
        self.visit_element(file, element);
    }

    fn visit_macrodef(&mut self, file: &BuildFile, element: ElementId) {
        self.visit_element(file, element);
    }

    fn visit_presetdef(&mut self, file: &BuildFile, element: ElementId) {
        self.visit_element(file, element);
    }

    fn visit_scriptdef(&mut self, file: &BuildFile, element: ElementId) {
        self.visit_element(file, element);
    }

    /// `<typedef>` and `<taskdef>`, which share a schema.
    fn visit_typedef(&mut self, file: &BuildFile, element: ElementId) {
        self.visit_element(file, element);
    }
}

/// Dispatches one element to the visitor method for its kind.
pub fn walk_element<V: ElementVisitor + ?Sized>(
    file: &BuildFile,
    element: ElementId,
    visitor: &mut V,
) {
    match file.kind(element) {
        ElementKind::Project => visitor.visit_project(file, element),
        ElementKind::Target => visitor.visit_target(file, element),
        ElementKind::Import => visitor.visit_import(file, element),
        ElementKind::Include => visitor.visit_include(file, element),
        ElementKind::Property => visitor.visit_property(file, element),
        ElementKind::MacroDef => visitor.visit_macrodef(file, element),
        ElementKind::PresetDef => visitor.visit_presetdef(file, element),
        ElementKind::ScriptDef => visitor.visit_scriptdef(file, element),
        ElementKind::TypeDef | ElementKind::TaskDef => visitor.visit_typedef(file, element),
        _ => visitor.visit_element(file, element),
    }
}

/// Dispatches every child of `element` in document order.
pub fn walk_children<V: ElementVisitor + ?Sized>(
    file: &BuildFile,
    element: ElementId,
    visitor: &mut V,
) {
    for &child in file.children(element) {
        walk_element(file, child, visitor);
    }
}
