// Example: realizing, recycling and live source changes over a flat list.
use realizer::{
    GeneratorDirection, GeneratorHost, GeneratorId, GeneratorPosition, ItemContainerGenerator,
    SourceChange,
};

#[derive(Clone, Debug, PartialEq)]
struct Row(String);

#[derive(Clone, Debug, PartialEq)]
struct Widget {
    id: u32,
    content: String,
}

struct ListHost {
    rows: Vec<Row>,
    next_widget: u32,
}

impl GeneratorHost<Row, Widget> for ListHost {
    fn view_len(&self, _group: Option<&Row>) -> usize {
        self.rows.len()
    }

    fn view_item(&self, _group: Option<&Row>, index: usize) -> Row {
        self.rows[index].clone()
    }

    fn container_for_item(&mut self, item: &Row, recycled: Option<Widget>) -> Widget {
        match recycled {
            Some(mut widget) => {
                widget.content = item.0.clone();
                widget
            }
            None => {
                let id = self.next_widget;
                self.next_widget += 1;
                Widget {
                    id,
                    content: item.0.clone(),
                }
            }
        }
    }

    fn header_for_group(&mut self, _group: &Row, _recycled: Option<Widget>) -> Widget {
        unreachable!("flat list has no groups")
    }
}

fn main() {
    let mut host = ListHost {
        rows: (0..10).map(|n| Row(format!("row {n}"))).collect(),
        next_widget: 0,
    };
    let mut generator: ItemContainerGenerator<Row, Widget> =
        ItemContainerGenerator::new(&mut host);
    let root = GeneratorId::ROOT;

    // Realize a "viewport" of the first four rows.
    generator
        .start_at(
            root,
            GeneratorPosition::before_first(),
            GeneratorDirection::Forward,
            false,
        )
        .unwrap();
    for _ in 0..4 {
        let (widget, newly) = generator.generate_next(root, &mut host).unwrap().unwrap();
        println!("realized {:?} newly={newly}", widget);
    }
    generator.stop(root).unwrap();

    // Scroll: recycle the top two widgets, then realize two more rows.
    generator
        .recycle(root, &mut host, GeneratorPosition::new(0, 0), 2)
        .unwrap();
    generator
        .start_at(
            root,
            GeneratorPosition::new(1, 1),
            GeneratorDirection::Forward,
            true,
        )
        .unwrap();
    for _ in 0..2 {
        let (widget, newly) = generator.generate_next(root, &mut host).unwrap().unwrap();
        println!("scrolled to {:?} newly={newly}", widget);
    }
    generator.stop(root).unwrap();

    // The source inserts a row; outstanding positions stay valid.
    host.rows.insert(3, Row("inserted".into()));
    generator
        .source_changing(root, &SourceChange::Inserted { index: 3 })
        .unwrap();
    generator
        .source_changed(root, &mut host, &SourceChange::Inserted { index: 3 })
        .unwrap();
    let position = generator.position_from_index(root, 3).unwrap();
    println!(
        "inserted row sits at position {:?}, index {}",
        position,
        generator.index_from_position(root, position).unwrap()
    );
}
