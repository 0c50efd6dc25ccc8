//! Perceiver and MobilePerceiver unit tests

#[cfg(test)]
mod tests {
    use janet_perception::{
        BasicPerceiverFilter, FixedPerceiver, Geometry, MobilePerceiver, Oid, Perceiver,
        PerceiverCallback, PerceiverFilter, PerceiverNewsAndFrees, PerceptionError, Point,
        QuadTree, QuadTreeConfig, QuadTreeElement, WorldNode, WorldNodeOptions,
        DEFAULT_UPDATE_THRESHOLD,
    };
    use parking_lot::Mutex;
    use std::sync::{Arc, Weak};

    /// Records every delivery and answers with a fixed count.
    struct Recorder {
        label: &'static str,
        answer: Option<usize>,
        log: Arc<Mutex<Vec<&'static str>>>,
        news: Mutex<Vec<Oid>>,
        frees: Mutex<Vec<Oid>>,
        perceiver_oids: Mutex<Vec<Option<Oid>>>,
    }

    impl Recorder {
        fn new(
            label: &'static str,
            answer: Option<usize>,
            log: Arc<Mutex<Vec<&'static str>>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                label,
                answer,
                log,
                news: Mutex::new(Vec::new()),
                frees: Mutex::new(Vec::new()),
                perceiver_oids: Mutex::new(Vec::new()),
            })
        }

        fn quiet() -> Arc<Self> {
            Self::new("quiet", None, Arc::new(Mutex::new(Vec::new())))
        }
    }

    impl PerceiverCallback for Recorder {
        fn process_news_and_frees(
            &self,
            news_and_frees: &PerceiverNewsAndFrees,
            perceiver_oid: Option<Oid>,
        ) -> Option<usize> {
            self.log.lock().push(self.label);
            self.news
                .lock()
                .extend(news_and_frees.news().iter().map(|e| e.oid()));
            self.frees.lock().extend_from_slice(news_and_frees.frees());
            self.perceiver_oids.lock().push(perceiver_oid);
            self.answer
        }
    }

    fn seeing(oid: u64, x: f32, z: f32, radius: f32) -> Arc<WorldNode> {
        WorldNode::new(
            Oid(oid),
            Point::new(x, 0.0, z),
            WorldNodeOptions {
                perceiver_radius: Some(radius),
                update_threshold: 10.0,
                ..Default::default()
            },
        )
    }

    fn blind(oid: u64, x: f32, z: f32) -> Arc<WorldNode> {
        WorldNode::new(Oid(oid), Point::new(x, 0.0, z), WorldNodeOptions::default())
    }

    fn ownerless(radius: f32) -> MobilePerceiver {
        let nobody: Weak<dyn QuadTreeElement> = Weak::<WorldNode>::new();
        MobilePerceiver::new(nobody, radius)
    }

    fn small_tree() -> Arc<QuadTree> {
        QuadTree::new(QuadTreeConfig {
            bounds: Geometry::new(-1000.0, 1000.0, -1000.0, 1000.0),
            max_elements_per_leaf: 1,
            max_depth: 2,
        })
    }

    // -----------------------------------------------------------------------
    // Mobile perceiver geometry
    // -----------------------------------------------------------------------

    #[test]
    fn mobile_perceiver_senses_square_around_owner() {
        let tree = QuadTree::new(QuadTreeConfig::default());
        let node = seeing(1, 0.0, 0.0, 100.0);
        node.spawn(&tree).unwrap();
        let p = node.perceiver().unwrap();

        assert!(p.overlaps(&Geometry::new(100.0, 200.0, -10.0, 10.0)));
        assert!(!p.overlaps(&Geometry::new(100.5, 200.0, -10.0, 10.0)));
        assert!(p.contains(&Geometry::new(-50.0, 50.0, -100.0, 100.0)));
        assert!(!p.contains(&Geometry::new(-50.0, 150.0, -50.0, 50.0)));
    }

    #[test]
    fn unspawned_owner_senses_nothing() {
        let node = seeing(1, 0.0, 0.0, 100.0);
        let p = node.perceiver().unwrap();
        assert!(!p.overlaps(&Geometry::new(-1.0, 1.0, -1.0, 1.0)));
        assert!(!p.contains(&Geometry::new(-1.0, 1.0, -1.0, 1.0)));
    }

    #[test]
    fn dropped_owner_senses_nothing() {
        let p = ownerless(100.0);
        assert!(p.element().is_none());
        assert!(p.owner_oid().is_none());
        assert!(!p.overlaps(&Geometry::new(-1.0, 1.0, -1.0, 1.0)));
        assert!(p.describe_owner().contains("owner dropped"));
    }

    #[test]
    fn describe_owner_names_perceiver_and_owner() {
        let node = seeing(42, 0.0, 0.0, 10.0);
        let p = node.perceiver().unwrap();
        assert_eq!(
            p.describe_owner(),
            format!("mobile perceiver {} of #42", p.id())
        );
        let zone = FixedPerceiver::new(Geometry::new(0.0, 1.0, 0.0, 1.0), None);
        assert_eq!(zone.describe_owner(), format!("perceiver {}", zone.id()));
    }

    #[test]
    fn perceiver_ids_are_unique() {
        let a = ownerless(1.0);
        let b = ownerless(1.0);
        assert_ne!(a.id(), b.id());
    }

    // -----------------------------------------------------------------------
    // Hysteresis
    // -----------------------------------------------------------------------

    #[test]
    fn first_location_always_updates() {
        let p = ownerless(10.0);
        assert!(p.last_update_loc().is_none());
        assert!(p.should_update_based_on_loc(&Point::new(1.0, 2.0, 3.0)));
        assert_eq!(p.last_update_loc(), Some(Point::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn small_moves_do_not_update_until_threshold_exceeded() {
        let p = ownerless(10.0);
        assert_eq!(
            p.threshold_squared(),
            DEFAULT_UPDATE_THRESHOLD * DEFAULT_UPDATE_THRESHOLD
        );
        p.set_update_threshold(100.0);

        assert!(p.should_update_based_on_loc(&Point::zero()));
        assert!(!p.should_update_based_on_loc(&Point::new(60.0, 0.0, 0.0)));
        assert!(!p.should_update_based_on_loc(&Point::new(100.0, 0.0, 0.0)));
        // Reference point only moves on an update.
        assert_eq!(p.last_update_loc(), Some(Point::zero()));
        assert!(p.should_update_based_on_loc(&Point::new(100.5, 0.0, 0.0)));
        assert!(!p.should_update_based_on_loc(&Point::new(150.0, 0.0, 0.0)));
    }

    #[test]
    fn vertical_motion_counts_toward_threshold() {
        let p = ownerless(10.0);
        p.set_update_threshold(50.0);
        assert!(p.should_update_based_on_loc(&Point::zero()));
        assert!(!p.should_update_based_on_loc(&Point::new(30.0, 30.0, 0.0)));
        assert!(p.should_update_based_on_loc(&Point::new(30.0, 30.0, 30.0)));
    }

    #[test]
    fn reset_forces_next_update() {
        let p = ownerless(10.0);
        assert!(p.should_update_based_on_loc(&Point::zero()));
        assert!(!p.should_update_based_on_loc(&Point::zero()));
        p.reset_hysteresis();
        assert!(p.should_update_based_on_loc(&Point::zero()));
    }

    // -----------------------------------------------------------------------
    // Filters
    // -----------------------------------------------------------------------

    struct RejectAll;

    impl PerceiverFilter for RejectAll {
        fn matches(&self, _: &dyn Perceiver, _: &dyn QuadTreeElement) -> bool {
            false
        }
    }

    #[test]
    fn no_filter_never_notifies_but_always_frees() {
        let p = ownerless(10.0);
        let other = blind(2, 0.0, 0.0);
        assert!(!p.should_notify_new_element(&*other));
        assert!(p.should_free_element(&*other));
    }

    #[test]
    fn filter_decides_both_news_and_frees() {
        let p = ownerless(10.0);
        let other = blind(2, 0.0, 0.0);
        p.set_filter(Some(Arc::new(RejectAll)));
        assert!(!p.should_notify_new_element(&*other));
        assert!(!p.should_free_element(&*other));

        p.set_filter(Some(Arc::new(BasicPerceiverFilter)));
        assert!(p.should_notify_new_element(&*other));
        assert!(p.should_free_element(&*other));
    }

    #[test]
    fn basic_filter_excludes_owner() {
        let node = seeing(1, 0.0, 0.0, 10.0);
        let other = blind(2, 0.0, 0.0);
        let p = node.perceiver().unwrap();
        assert!(p.filter().is_some());
        assert!(!p.should_notify_new_element(&*node));
        assert!(p.should_notify_new_element(&*other));
    }

    // -----------------------------------------------------------------------
    // Callbacks
    // -----------------------------------------------------------------------

    #[test]
    fn callbacks_run_in_registration_order_and_last_count_wins() {
        let zone = FixedPerceiver::new(Geometry::new(0.0, 1.0, 0.0, 1.0), None);
        let log = Arc::new(Mutex::new(Vec::new()));
        zone.register_callback(Recorder::new("first", Some(1), log.clone()));
        zone.register_callback(Recorder::new("second", Some(3), log.clone()));
        zone.register_callback(Recorder::new("third", None, log.clone()));

        let count = zone.process_news_and_frees(&PerceiverNewsAndFrees::new(), Some(Oid(9)));
        assert_eq!(count, Some(3));
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn no_counting_callback_yields_none() {
        let zone = FixedPerceiver::new(Geometry::new(0.0, 1.0, 0.0, 1.0), None);
        assert_eq!(zone.process_news_and_frees(&PerceiverNewsAndFrees::new(), None), None);
        zone.register_callback(Recorder::quiet());
        assert_eq!(zone.process_news_and_frees(&PerceiverNewsAndFrees::new(), None), None);
    }

    #[test]
    fn registering_same_callback_twice_is_ignored() {
        let zone = FixedPerceiver::new(Geometry::new(0.0, 1.0, 0.0, 1.0), None);
        let cb: Arc<dyn PerceiverCallback> = Recorder::quiet();
        zone.register_callback(cb.clone());
        zone.register_callback(cb.clone());
        assert_eq!(zone.callback_count(), 1);
        zone.unregister_callback(&cb);
        assert_eq!(zone.callback_count(), 0);
    }

    // -----------------------------------------------------------------------
    // Node subscriptions
    // -----------------------------------------------------------------------

    #[test]
    fn duplicate_subscription_is_an_error() {
        let zone = FixedPerceiver::new(Geometry::new(0.0, 1.0, 0.0, 1.0), None);
        zone.add_quad_tree_node(3).unwrap();
        let err = zone.add_quad_tree_node(3).unwrap_err();
        assert!(matches!(err, PerceptionError::SubscriptionExists { node: 3, .. }));
        assert_eq!(zone.quad_tree_nodes(), vec![3]);
    }

    #[test]
    fn removing_missing_subscription_is_an_error() {
        let zone = FixedPerceiver::new(Geometry::new(0.0, 1.0, 0.0, 1.0), None);
        let err = zone.remove_quad_tree_node(5).unwrap_err();
        assert!(matches!(err, PerceptionError::SubscriptionMissing { node: 5, .. }));
        zone.add_quad_tree_node(5).unwrap();
        zone.remove_quad_tree_node(5).unwrap();
        assert!(!zone.is_subscribed(5));
    }

    #[test]
    fn clear_returns_previous_subscriptions() {
        let zone = FixedPerceiver::new(Geometry::new(0.0, 1.0, 0.0, 1.0), None);
        for node in [7, 2, 4] {
            zone.add_quad_tree_node(node).unwrap();
        }
        assert_eq!(zone.clear_quad_tree_nodes(), vec![2, 4, 7]);
        assert!(zone.quad_tree_nodes().is_empty());
    }

    // -----------------------------------------------------------------------
    // News and frees
    // -----------------------------------------------------------------------

    #[test]
    fn news_and_frees_accumulate() {
        let mut nf = PerceiverNewsAndFrees::new();
        assert!(nf.is_empty());
        nf.add_news(blind(1, 0.0, 0.0));
        nf.add_free(Oid(2));
        nf.add_free(Oid(3));
        assert!(!nf.is_empty());
        assert_eq!(nf.news_count(), 1);
        assert_eq!(nf.free_count(), 2);
        assert_eq!(nf.news()[0].oid(), Oid(1));
        assert_eq!(nf.frees(), &[Oid(2), Oid(3)]);
    }

    // -----------------------------------------------------------------------
    // Mobile perception through the tree
    // -----------------------------------------------------------------------

    #[test]
    fn spawned_nodes_see_each_other_but_not_themselves() {
        let tree = QuadTree::new(QuadTreeConfig::default());
        let a = seeing(1, 0.0, 0.0, 100.0);
        let b = seeing(2, 50.0, 50.0, 100.0);
        let rec_a = Recorder::quiet();
        a.perceiver().unwrap().register_callback(rec_a.clone());

        a.spawn(&tree).unwrap();
        b.spawn(&tree).unwrap();

        let pa = a.perceiver().unwrap();
        let pb = b.perceiver().unwrap();
        assert_eq!(pa.perceived(), vec![Oid(2)]);
        assert_eq!(pb.perceived(), vec![Oid(1)]);
        assert_eq!(*rec_a.news.lock(), vec![Oid(2)]);
        assert_eq!(*rec_a.perceiver_oids.lock(), vec![Some(Oid(1))]);
    }

    #[test]
    fn despawn_frees_from_observers_and_clears_own_view() {
        let tree = QuadTree::new(QuadTreeConfig::default());
        let a = seeing(1, 0.0, 0.0, 100.0);
        let b = seeing(2, 50.0, 50.0, 100.0);
        let rec_a = Recorder::quiet();
        let rec_b = Recorder::quiet();
        a.perceiver().unwrap().register_callback(rec_a.clone());
        b.perceiver().unwrap().register_callback(rec_b.clone());
        a.spawn(&tree).unwrap();
        b.spawn(&tree).unwrap();

        b.despawn().unwrap();
        assert_eq!(*rec_a.frees.lock(), vec![Oid(2)]);
        assert_eq!(*rec_b.frees.lock(), vec![Oid(1)]);
        assert!(b.perceiver().unwrap().quad_tree_nodes().is_empty());
        assert!(b.perceiver().unwrap().perceived().is_empty());
        assert_eq!(tree.lock().perceiver_count(), 1);
    }

    #[test]
    fn moving_between_leaves_reports_news_then_frees() {
        let tree = small_tree();
        let a = seeing(1, -500.0, -500.0, 100.0);
        let b = blind(2, 500.0, 500.0);
        let rec = Recorder::quiet();
        a.perceiver().unwrap().register_callback(rec.clone());
        a.spawn(&tree).unwrap();
        b.spawn(&tree).unwrap();
        assert!(a.perceiver().unwrap().perceived().is_empty());

        a.set_loc(Point::new(450.0, 0.0, 450.0));
        assert_eq!(*rec.news.lock(), vec![Oid(2)]);

        a.set_loc(Point::new(-500.0, 0.0, -500.0));
        assert_eq!(*rec.frees.lock(), vec![Oid(2)]);
        assert!(a.perceiver().unwrap().perceived().is_empty());
    }

    #[test]
    fn dropped_element_is_freed_without_filter_check() {
        let tree = QuadTree::new(QuadTreeConfig::default());
        let zone = Arc::new(FixedPerceiver::new(
            Geometry::new(-10.0, 10.0, -10.0, 10.0),
            Some(Arc::new(BasicPerceiverFilter)),
        ));
        let rec = Recorder::quiet();
        zone.register_callback(rec.clone());
        tree.lock().add_perceiver(zone.clone());

        let b = blind(2, 0.0, 0.0);
        b.spawn(&tree).unwrap();
        assert_eq!(zone.perceived(), vec![Oid(2)]);

        // A rejecting filter keeps a live element perceived after it leaves.
        zone.set_filter(Some(Arc::new(RejectAll)));
        b.despawn().unwrap();
        assert!(rec.frees.lock().is_empty());
        assert_eq!(zone.perceived(), vec![Oid(2)]);

        drop(b);
        tree.lock().refresh_perceiver(&*zone).unwrap();
        assert_eq!(*rec.frees.lock(), vec![Oid(2)]);
        assert!(zone.perceived().is_empty());
    }
}
