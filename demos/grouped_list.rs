// Example: grouped generation with nested generators and hide-if-empty.
use realizer::{
    GeneratorDirection, GeneratorHost, GeneratorId, GeneratorPosition, GroupStyle,
    ItemContainerGenerator, SourceChange,
};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
enum Item {
    Contact(String),
    Letter(char),
}

#[derive(Clone, Debug, PartialEq)]
struct Widget {
    id: u32,
    header: bool,
}

struct ContactsHost {
    letters: Vec<char>,
    by_letter: BTreeMap<char, Vec<Item>>,
    next_widget: u32,
}

impl ContactsHost {
    fn new(names: &[&str]) -> Self {
        let mut by_letter: BTreeMap<char, Vec<Item>> = BTreeMap::new();
        for name in names {
            let letter = name.chars().next().unwrap_or('?');
            by_letter
                .entry(letter)
                .or_default()
                .push(Item::Contact((*name).into()));
        }
        Self {
            letters: by_letter.keys().copied().collect(),
            by_letter,
            next_widget: 0,
        }
    }

    fn fresh(&mut self, header: bool) -> Widget {
        let id = self.next_widget;
        self.next_widget += 1;
        Widget { id, header }
    }
}

impl GeneratorHost<Item, Widget> for ContactsHost {
    fn view_len(&self, group: Option<&Item>) -> usize {
        match group {
            None => self.letters.len(),
            Some(Item::Letter(l)) => self.by_letter.get(l).map_or(0, Vec::len),
            Some(Item::Contact(_)) => 0,
        }
    }

    fn view_item(&self, group: Option<&Item>, index: usize) -> Item {
        match group {
            None => Item::Letter(self.letters[index]),
            Some(Item::Letter(l)) => self.by_letter[l][index].clone(),
            Some(Item::Contact(_)) => unreachable!("contacts have no members"),
        }
    }

    fn is_group(&self, item: &Item) -> bool {
        matches!(item, Item::Letter(_))
    }

    fn has_collection_groups(&self) -> bool {
        true
    }

    fn group_style(&self, level: usize) -> Option<GroupStyle> {
        (level == 0).then_some(GroupStyle {
            hides_if_empty: true,
        })
    }

    fn container_for_item(&mut self, _item: &Item, recycled: Option<Widget>) -> Widget {
        recycled.unwrap_or_else(|| self.fresh(false))
    }

    fn header_for_group(&mut self, _group: &Item, recycled: Option<Widget>) -> Widget {
        recycled.unwrap_or_else(|| self.fresh(true))
    }

    fn set_header_hidden(&mut self, container: &Widget, hidden: bool) {
        println!("header {} hidden={hidden}", container.id);
    }
}

fn main() {
    let mut host = ContactsHost::new(&["Ada", "Alan", "Barbara", "Grace"]);
    host.letters.push('Z'); // an empty group, hidden by style
    host.by_letter.insert('Z', Vec::new());

    let mut generator: ItemContainerGenerator<Item, Widget> =
        ItemContainerGenerator::new(&mut host);
    let root = GeneratorId::ROOT;

    // Realize every group header, then every member beneath it.
    generator
        .start_at(
            root,
            GeneratorPosition::before_first(),
            GeneratorDirection::Forward,
            false,
        )
        .unwrap();
    let mut headers = Vec::new();
    while let Some((header, _)) = generator.generate_next(root, &mut host).unwrap() {
        headers.push(header);
    }
    generator.stop(root).unwrap();

    for header in &headers {
        let nested = generator.nested_generator(root, header).unwrap();
        generator
            .start_at(
                nested,
                GeneratorPosition::before_first(),
                GeneratorDirection::Forward,
                false,
            )
            .unwrap();
        while let Some((widget, _)) = generator.generate_next(nested, &mut host).unwrap() {
            let item = generator.item_from_container(nested, &host, &widget);
            println!("group header {} -> {:?}", header.id, item);
        }
        generator.stop(nested).unwrap();
    }
    println!("total contacts: {}", generator.count(root, &host));

    // A contact joins the empty group; its header comes back.
    let z_header = headers.last().unwrap();
    let nested = generator.nested_generator(root, z_header).unwrap();
    host.by_letter
        .get_mut(&'Z')
        .unwrap()
        .push(Item::Contact("Zeno".into()));
    generator
        .source_changing(nested, &SourceChange::Inserted { index: 0 })
        .unwrap();
    generator
        .source_changed(nested, &mut host, &SourceChange::Inserted { index: 0 })
        .unwrap();
    println!("total contacts: {}", generator.count(root, &host));
}
