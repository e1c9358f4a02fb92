use super::*;
use crate::expressions::{Node, OperationType};
use crate::testing::{Product, Vendor};

fn product() -> Expr<Product, Product> {
    Expr::arg()
}

#[test]
fn test_eq_null_becomes_is_null() {
    let vendor = product().property(&Product::vendor());
    let price = product().property(&Product::price());

    let predicate = price.eq(7);
    assert_eq!(predicate.expression().kind(), ExpressionType::Equals);

    let empty_name = vendor.property(&Vendor::name()).eq(String::new());
    assert_eq!(empty_name.expression().kind(), ExpressionType::Equals);

    let null_vendor = product().property_meta::<Option<Vendor>, Object>(
        Product::vendor().meta(),
    );
    assert_eq!(null_vendor.eq(None::<Vendor>).expression().kind(), ExpressionType::IsNull);

    let not_null = null_vendor.not_eq(None::<Vendor>);
    assert_eq!(not_null.expression().kind(), ExpressionType::Not);
    match not_null.expression().node() {
        Node::Unary(inner) => assert_eq!(inner.kind(), ExpressionType::IsNull),
        other => panic!("unexpected node {:?}", other),
    }
}

#[test]
fn test_casts_reuse_node_when_capability_satisfied() {
    let price = product().property(&Product::price());
    let comparable = price.as_comparable();
    assert!(Arc::ptr_eq(price.expression(), comparable.expression()));

    let text = price.as_string();
    assert_eq!(text.expression().kind(), ExpressionType::AsString);
    assert_eq!(text.expression().object_type(), ValueType::String);

    let vendor = product().property(&Product::vendor());
    let cast = vendor.as_comparable();
    assert_eq!(cast.expression().kind(), ExpressionType::AsComparable);
}

#[test]
fn test_greater_or_equal_expands_to_disjunction() {
    let ge = product().property(&Product::price()).greater_or_equal(10);
    assert_eq!(ge.expression().kind(), ExpressionType::Or);
    match ge.expression().node() {
        Node::Binary(left, right) => {
            assert_eq!(left.kind(), ExpressionType::GreaterThan);
            assert_eq!(right.kind(), ExpressionType::Equals);
        }
        other => panic!("unexpected node {:?}", other),
    }

    let between = product().property(&Product::price()).between(1, 5);
    assert_eq!(between.expression().kind(), ExpressionType::And);
}

#[test]
fn test_property_chain_and_composition() {
    let vendor_name = product()
        .property(&Product::vendor())
        .property(&Vendor::name());
    assert_eq!(vendor_name.expression().operation_type(), OperationType::Property);
    assert_eq!(vendor_name.to_string(), "$.vendor.name");

    let upper_name = Expr::<Vendor, Vendor>::arg()
        .property(&Vendor::name())
        .to_upper();
    let composed = product().property(&Product::vendor()).compose(&upper_name);
    assert_eq!(composed.expression().kind(), ExpressionType::Composition);
    assert_eq!(composed.expression().capability(), Capability::String);
    assert_eq!(
        composed.expression().argument_type(),
        Some(ValueType::entity::<Product>())
    );
}

#[test]
fn test_structurally_equal_builders_produce_equal_trees() {
    let a = product().property(&Product::name()).contains("ban");
    let b = product().property(&Product::name()).contains("ban");
    let c = product().property(&Product::name()).contains("bon");
    assert_eq!(a.expression(), b.expression());
    assert_ne!(a.expression(), c.expression());
}

#[test]
fn test_collection_operators() {
    let tags = product().property(&Product::tags());
    assert_eq!(tags.count().expression().object_type(), ValueType::Integer);
    assert_eq!(tags.is_empty().expression().capability(), Capability::Boolean);
    assert!(tags.sum().expression().kind().is_aggregate());

    let in_tags = product().property(&Product::name()).is_in_expr(&tags);
    assert_eq!(in_tags.expression().kind(), ExpressionType::ValueIn);

    let in_list = product().property(&Product::price()).is_in([1, 2, 3]);
    match in_list.expression().node() {
        Node::Binary(_, values) => match values.node() {
            Node::Constant(constant) => assert_eq!(constant.value(), &serde_json::json!([1, 2, 3])),
            other => panic!("unexpected node {:?}", other),
        },
        other => panic!("unexpected node {:?}", other),
    }
}
