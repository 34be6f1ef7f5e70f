//! 文档节点竞技场
//!
//! 页面文档以竞技场（arena）的形式保存：每个节点占据一个槽位，
//! 通过 `NodeId` 访问。节点句柄在文档生命周期内保持稳定，
//! 被移出树的节点依然可以寻址，因此引擎可以像持有 DOM 引用一样持有它们。

use std::fmt;

use html5ever::interface::{Attribute, QualName};
use html5ever::tendril::format_tendril;
use html5ever::{namespace_url, ns, LocalName};

use super::mutation::{MutationKind, MutationObserver, MutationRecord};

/// 稳定的节点句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// 槽位下标
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 边界矩形（视口坐标）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 宽或高为零的矩形视为空
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

/// 元素的布局信息
///
/// 引擎本身不做排版，布局由宿主页面提供。`rect` 为 `None` 表示尚未排版，
/// 此时元素视为可见但不在视口内。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    /// 为 `false` 时相当于 `display: none`
    pub displayed: bool,
    pub rect: Option<Rect>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            displayed: true,
            rect: None,
        }
    }
}

impl Layout {
    /// `display: none`
    pub fn hidden() -> Self {
        Self {
            displayed: false,
            rect: None,
        }
    }

    /// 已排版到指定位置
    pub fn at(rect: Rect) -> Self {
        Self {
            displayed: true,
            rect: Some(rect),
        }
    }
}

/// 节点数据
#[derive(Debug, Clone)]
pub enum NodeData {
    Document,
    Doctype {
        name: String,
    },
    Element {
        name: QualName,
        attrs: Vec<Attribute>,
        layout: Layout,
    },
    Text {
        contents: String,
    },
    Comment {
        contents: String,
    },
}

#[derive(Debug, Clone)]
pub(super) struct Slot {
    pub(super) data: NodeData,
    pub(super) parent: Option<NodeId>,
    pub(super) children: Vec<NodeId>,
    released: bool,
}

/// 页面文档
pub struct Document {
    pub(super) slots: Vec<Slot>,
    /// 已回收、可以复用的槽位
    free: Vec<NodeId>,
    root: NodeId,
    viewport: Rect,
    pub(super) observer: MutationObserver,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.slots.len())
            .field("free", &self.free.len())
            .field("viewport", &self.viewport)
            .finish()
    }
}

impl Document {
    /// 创建只包含文档根节点的空文档
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
                released: false,
            }],
            free: Vec::new(),
            root: NodeId(0),
            viewport: Rect::new(0.0, 0.0, 1280.0, 720.0),
            observer: MutationObserver::default(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    /// 竞技场的槽位总数（包括已脱离树的节点和待复用的槽位）
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// 待复用的槽位数
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.len() <= 1
    }

    // ------------------------------------------------------------------
    // 节点创建
    // ------------------------------------------------------------------

    pub(super) fn alloc(&mut self, data: NodeData) -> NodeId {
        let slot = Slot {
            data,
            parent: None,
            children: Vec::new(),
            released: false,
        };

        if let Some(id) = self.free.pop() {
            self.slots[id.0] = slot;
            return id;
        }

        let id = NodeId(self.slots.len());
        self.slots.push(slot);
        id
    }

    /// 回收游离子树的全部槽位，之后这些 `NodeId` 会被新节点复用
    ///
    /// `node` 仍挂在父节点下、是文档根或已被回收时什么也不做。
    pub fn release(&mut self, node: NodeId) {
        if node == self.root || self.parent(node).is_some() || self.slots[node.0].released {
            return;
        }

        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let slot = &mut self.slots[current.0];
            stack.append(&mut slot.children);
            slot.parent = None;
            slot.data = NodeData::Comment {
                contents: String::new(),
            };
            slot.released = true;
            self.free.push(current);
        }
    }

    /// 创建游离的 HTML 元素
    pub fn create_element(&mut self, name: &str) -> NodeId {
        let name = QualName::new(None, ns!(html), LocalName::from(name.to_ascii_lowercase()));
        self.alloc(NodeData::Element {
            name,
            attrs: Vec::new(),
            layout: Layout::default(),
        })
    }

    /// 创建带属性的游离元素
    pub fn create_element_with_attrs(&mut self, name: &str, attrs: &[(&str, &str)]) -> NodeId {
        let element = self.create_element(name);
        for (attr_name, attr_value) in attrs {
            self.set_attr(element, attr_name, attr_value);
        }
        element
    }

    pub fn create_text(&mut self, data: &str) -> NodeId {
        self.alloc(NodeData::Text {
            contents: data.to_string(),
        })
    }

    pub fn create_comment(&mut self, data: &str) -> NodeId {
        self.alloc(NodeData::Comment {
            contents: data.to_string(),
        })
    }

    // ------------------------------------------------------------------
    // 节点查询
    // ------------------------------------------------------------------

    pub fn data(&self, node: NodeId) -> &NodeData {
        &self.slots[node.0].data
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        matches!(self.data(node), NodeData::Element { .. })
    }

    pub fn is_text(&self, node: NodeId) -> bool {
        matches!(self.data(node), NodeData::Text { .. })
    }

    /// 元素的本地标签名（小写）
    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        match self.data(node) {
            NodeData::Element { name, .. } => Some(name.local.as_ref()),
            _ => None,
        }
    }

    /// 文本节点的字符数据
    pub fn text(&self, node: NodeId) -> Option<&str> {
        match self.data(node) {
            NodeData::Text { contents } => Some(contents.as_str()),
            _ => None,
        }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.slots[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.slots[node.0].children
    }

    pub fn first_element_child(&self, node: NodeId) -> Option<NodeId> {
        self.children(node)
            .iter()
            .copied()
            .find(|&child| self.is_element(child))
    }

    pub fn next_element_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&sibling| sibling == node)?;
        siblings[index + 1..]
            .iter()
            .copied()
            .find(|&sibling| self.is_element(sibling))
    }

    pub fn previous_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&sibling| sibling == node)?;
        index.checked_sub(1).map(|i| siblings[i])
    }

    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&sibling| sibling == node)?;
        siblings.get(index + 1).copied()
    }

    /// 从父节点开始向上遍历祖先节点（不含自身）
    pub fn ancestors(&self, node: NodeId) -> Ancestors<'_> {
        Ancestors {
            doc: self,
            next: self.parent(node),
        }
    }

    /// 前序遍历的全部后代节点（不含自身）
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            found.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        found
    }

    /// `ancestor` 是否为 `node` 的祖先或其本身
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        node == ancestor || self.ancestors(node).any(|parent| parent == ancestor)
    }

    /// 节点是否挂在文档树上
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.contains(self.root, node)
    }

    /// 等价于 DOM 的 `textContent`
    pub fn text_content(&self, node: NodeId) -> String {
        match self.data(node) {
            NodeData::Text { contents } | NodeData::Comment { contents } => contents.clone(),
            NodeData::Doctype { .. } => String::new(),
            NodeData::Element { .. } | NodeData::Document => {
                let mut text = String::new();
                for descendant in self.descendants(node) {
                    if let NodeData::Text { contents } = self.data(descendant) {
                        text.push_str(contents);
                    }
                }
                text
            }
        }
    }

    // ------------------------------------------------------------------
    // 属性
    // ------------------------------------------------------------------

    /// 获取节点属性值
    pub fn get_attr(&self, node: NodeId, attr_name: &str) -> Option<&str> {
        match self.data(node) {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|attr| &*attr.name.local == attr_name)
                .map(|attr| &*attr.value),
            _ => None,
        }
    }

    pub fn has_attr(&self, node: NodeId, attr_name: &str) -> bool {
        self.get_attr(node, attr_name).is_some()
    }

    /// 设置节点属性（属性变更不会产生变更记录）
    pub fn set_attr(&mut self, node: NodeId, attr_name: &str, attr_value: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.slots[node.0].data {
            if let Some(existing) = attrs.iter_mut().find(|attr| &*attr.name.local == attr_name) {
                existing.value.clear();
                existing.value.push_slice(attr_value);
                return;
            }

            attrs.push(Attribute {
                name: QualName::new(None, ns!(), LocalName::from(attr_name)),
                value: format_tendril!("{}", attr_value),
            });
        }
    }

    pub fn remove_attr(&mut self, node: NodeId, attr_name: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.slots[node.0].data {
            attrs.retain(|attr| &*attr.name.local != attr_name);
        }
    }

    /// `class` 属性中是否包含指定类名
    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.get_attr(node, "class")
            .map(|value| value.split_ascii_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // 布局与可编辑性
    // ------------------------------------------------------------------

    pub fn layout(&self, node: NodeId) -> Option<Layout> {
        match self.data(node) {
            NodeData::Element { layout, .. } => Some(*layout),
            _ => None,
        }
    }

    pub fn set_layout(&mut self, node: NodeId, new_layout: Layout) {
        if let NodeData::Element { layout, .. } = &mut self.slots[node.0].data {
            *layout = new_layout;
        }
    }

    /// 文本节点取其父元素
    fn layout_element(&self, node: NodeId) -> Option<NodeId> {
        if self.is_element(node) {
            Some(node)
        } else {
            self.parent(node).filter(|&parent| self.is_element(parent))
        }
    }

    /// 元素是否可见：自身及祖先均未隐藏，且边界矩形（若已知）不为空
    pub fn is_visible(&self, node: NodeId) -> bool {
        let Some(element) = self.layout_element(node) else {
            return false;
        };

        let hidden_ancestor = std::iter::once(element)
            .chain(self.ancestors(element))
            .filter_map(|n| self.layout(n))
            .any(|layout| !layout.displayed);

        if hidden_ancestor {
            return false;
        }

        match self.layout(element).and_then(|layout| layout.rect) {
            Some(rect) => !rect.is_empty(),
            None => true,
        }
    }

    /// 元素的边界矩形是否与视口相交
    pub fn is_in_viewport(&self, node: NodeId) -> bool {
        self.layout_element(node)
            .and_then(|element| self.layout(element))
            .and_then(|layout| layout.rect)
            .map(|rect| rect.intersects(&self.viewport))
            .unwrap_or(false)
    }

    /// 最近的带 `contenteditable` 属性的祖先（或自身）决定可编辑性
    pub fn is_content_editable(&self, node: NodeId) -> bool {
        for current in std::iter::once(node).chain(self.ancestors(node)) {
            if let Some(value) = self.get_attr(current, "contenteditable") {
                return match value.to_ascii_lowercase().as_str() {
                    "" | "true" | "plaintext-only" => true,
                    _ => false,
                };
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // 树变更（会产生变更记录）
    // ------------------------------------------------------------------

    /// 把节点从当前父节点上摘下
    fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.parent(node) {
            self.remove_child(parent, node);
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// 在 `reference` 之前插入；`reference` 为 `None` 时追加到末尾
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        self.detach(child);

        let index = reference
            .and_then(|r| self.children(parent).iter().position(|&c| c == r))
            .unwrap_or(self.children(parent).len());

        let previous_sibling = index.checked_sub(1).map(|i| self.slots[parent.0].children[i]);
        let next_sibling = self.slots[parent.0].children.get(index).copied();

        self.slots[parent.0].children.insert(index, child);
        self.slots[child.0].parent = Some(parent);

        self.notify(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: vec![child],
                removed: Vec::new(),
                previous_sibling,
                next_sibling,
            },
        });
    }

    /// 移除子节点；`child` 不是 `parent` 的子节点时什么也不做
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Option<NodeId> {
        let index = self.children(parent).iter().position(|&c| c == child)?;

        let previous_sibling = index.checked_sub(1).map(|i| self.slots[parent.0].children[i]);
        let next_sibling = self.slots[parent.0].children.get(index + 1).copied();

        self.slots[parent.0].children.remove(index);
        self.slots[child.0].parent = None;

        self.notify(MutationRecord {
            target: parent,
            kind: MutationKind::ChildList {
                added: Vec::new(),
                removed: vec![child],
                previous_sibling,
                next_sibling,
            },
        });

        Some(child)
    }

    /// 移除全部子节点并按原顺序返回
    pub fn remove_all_children(&mut self, parent: NodeId) -> Vec<NodeId> {
        let children = self.children(parent).to_vec();
        for &child in &children {
            self.remove_child(parent, child);
        }
        children
    }

    /// 修改文本节点的字符数据
    pub fn set_text(&mut self, node: NodeId, data: &str) {
        if let NodeData::Text { contents } = &mut self.slots[node.0].data {
            contents.clear();
            contents.push_str(data);
        } else {
            return;
        }

        self.notify(MutationRecord {
            target: node,
            kind: MutationKind::CharacterData,
        });
    }

    /// 复制节点，得到的副本是游离的
    pub fn clone_node(&mut self, node: NodeId, deep: bool) -> NodeId {
        let copy = self.alloc(self.data(node).clone());
        if deep {
            for child in self.children(node).to_vec() {
                let child_copy = self.clone_node(child, true);
                self.slots[child_copy.0].parent = Some(copy);
                self.slots[copy.0].children.push(child_copy);
            }
        }
        copy
    }

    // ------------------------------------------------------------------
    // 查找
    // ------------------------------------------------------------------

    /// 根据名称获取子节点
    pub fn get_child_element_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&child| self.tag_name(child) == Some(name))
    }

    /// 前序遍历中第一个指定标签的元素
    pub fn find_first(&self, name: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|&node| self.tag_name(node) == Some(name))
    }

    pub fn find_all(&self, name: &str) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|&node| self.tag_name(node) == Some(name))
            .collect()
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|&node| self.get_attr(node, "id") == Some(id))
    }

    pub fn document_element(&self) -> Option<NodeId> {
        self.get_child_element_by_name(self.root, "html")
    }

    pub fn head(&self) -> Option<NodeId> {
        self.get_child_element_by_name(self.document_element()?, "head")
    }

    pub fn body(&self) -> Option<NodeId> {
        self.get_child_element_by_name(self.document_element()?, "body")
    }

    /// `head > title`
    pub fn title(&self) -> Option<NodeId> {
        self.get_child_element_by_name(self.head()?, "title")
    }
}

/// 祖先迭代器
pub struct Ancestors<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.doc.parent(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_moves_node_between_parents() {
        let mut doc = Document::new();
        let a = doc.create_element("div");
        let b = doc.create_element("div");
        let text = doc.create_text("hi");

        doc.append_child(a, text);
        doc.append_child(b, text);

        assert!(doc.children(a).is_empty());
        assert_eq!(doc.children(b), &[text]);
        assert_eq!(doc.parent(text), Some(b));
    }

    #[test]
    fn test_release_reuses_detached_slots() {
        let mut doc = Document::new();
        let live = doc.create_element("p");
        doc.append_child(doc.root(), live);

        let scratch = doc.create_element("body");
        let b = doc.create_element("b");
        let text = doc.create_text("weg");
        doc.append_child(scratch, b);
        doc.append_child(b, text);
        let size = doc.len();

        doc.release(live);
        assert_eq!(doc.free_slots(), 0);

        doc.release(scratch);
        doc.release(scratch);
        assert_eq!(doc.free_slots(), 3);

        let reused = doc.create_text("neu");
        assert_eq!(doc.len(), size);
        assert_eq!(doc.text(reused), Some("neu"));
        assert_eq!(doc.parent(reused), None);
        assert!(doc.children(reused).is_empty());
        assert_eq!(doc.free_slots(), 2);
    }

    #[test]
    fn test_insert_before_and_siblings() {
        let mut doc = Document::new();
        let parent = doc.create_element("p");
        let first = doc.create_element("b");
        let last = doc.create_element("i");
        let middle = doc.create_text("x");

        doc.append_child(parent, first);
        doc.append_child(parent, last);
        doc.insert_before(parent, middle, Some(last));

        assert_eq!(doc.children(parent), &[first, middle, last]);
        assert_eq!(doc.next_element_sibling(first), Some(last));
        assert_eq!(doc.previous_sibling(last), Some(middle));
        assert_eq!(doc.first_element_child(parent), Some(first));
    }

    #[test]
    fn test_text_content_and_clone() {
        let mut doc = Document::new();
        let p = doc.create_element("p");
        let hello = doc.create_text("Hello ");
        let b = doc.create_element("b");
        let world = doc.create_text("world");
        doc.append_child(p, hello);
        doc.append_child(p, b);
        doc.append_child(b, world);

        assert_eq!(doc.text_content(p), "Hello world");

        let copy = doc.clone_node(p, true);
        assert_ne!(copy, p);
        assert_eq!(doc.parent(copy), None);
        assert_eq!(doc.text_content(copy), "Hello world");
        assert_ne!(doc.children(copy)[1], b);
    }

    #[test]
    fn test_attributes_and_classes() {
        let mut doc = Document::new();
        let div = doc.create_element_with_attrs("div", &[("class", "a notranslate")]);

        assert!(doc.has_class(div, "notranslate"));
        assert!(!doc.has_class(div, "translate"));

        doc.set_attr(div, "lang", "de");
        doc.set_attr(div, "lang", "fr");
        assert_eq!(doc.get_attr(div, "lang"), Some("fr"));

        doc.remove_attr(div, "lang");
        assert!(!doc.has_attr(div, "lang"));
    }

    #[test]
    fn test_visibility_rules() {
        let mut doc = Document::new();
        let outer = doc.create_element("div");
        let inner = doc.create_element("p");
        doc.append_child(outer, inner);

        assert!(doc.is_visible(inner));
        assert!(!doc.is_in_viewport(inner));

        doc.set_layout(inner, Layout::at(Rect::new(10.0, 10.0, 100.0, 20.0)));
        assert!(doc.is_in_viewport(inner));

        doc.set_layout(inner, Layout::at(Rect::new(10.0, 5000.0, 100.0, 20.0)));
        assert!(doc.is_visible(inner));
        assert!(!doc.is_in_viewport(inner));

        doc.set_layout(inner, Layout::at(Rect::new(10.0, 10.0, 0.0, 0.0)));
        assert!(!doc.is_visible(inner));

        doc.set_layout(inner, Layout::default());
        doc.set_layout(outer, Layout::hidden());
        assert!(!doc.is_visible(inner));
    }

    #[test]
    fn test_content_editable_inheritance() {
        let mut doc = Document::new();
        let editor = doc.create_element_with_attrs("div", &[("contenteditable", "")]);
        let inner = doc.create_element("p");
        let locked = doc.create_element_with_attrs("span", &[("contenteditable", "false")]);
        doc.append_child(editor, inner);
        doc.append_child(inner, locked);

        assert!(doc.is_content_editable(editor));
        assert!(doc.is_content_editable(inner));
        assert!(!doc.is_content_editable(locked));
    }
}
