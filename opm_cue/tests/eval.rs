use opm_cue::ast::{self, BinOp, Key};
use opm_cue::{Context, Error, FieldIter, Path, Selector, Value};
use serde_json::json;

fn compile(src: &str) -> Value {
    Context::new().compile("<test>", src).unwrap()
}

#[test]
fn scalars_and_structs_decode() {
    let v = compile("name: \"web\"\nport: 8080\nspec: {replicas: 3, ha: true}\n");
    assert_eq!(v.lookup_path("name").unwrap().as_string().unwrap(), "web");
    assert_eq!(v.lookup_path("port").unwrap().as_int().unwrap(), 8080);
    assert_eq!(
        v.lookup_path("spec").unwrap().to_json().unwrap(),
        json!({"replicas": 3, "ha": true}),
    );
}

#[test]
fn lookup_missing_path_errors() {
    let v = compile("a: 1\n");
    match v.lookup_path("b.c") {
        Err(Error::NotFound(p)) => assert_eq!(p, "b.c"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn fill_propagates_through_references() {
    // A component that reads its replica count out of the config schema
    // becomes concrete once the config is filled.
    let ctx = Context::new();
    let v = ctx
        .compile(
            "<test>",
            "#config: {replicas: int, image: string}\n\
             web: {\n\
             \treplicas: #config.replicas\n\
             \timage:    #config.image\n\
             }\n",
        )
        .unwrap();
    assert!(v.lookup_path("web").unwrap().validate_concrete().is_err());

    let filled = v.fill_path(
        "#config",
        &ctx.encode(&json!({"replicas": 3, "image": "nginx:1.28"})),
    );
    let web = filled.lookup_path("web").unwrap();
    web.validate_concrete().unwrap();
    assert_eq!(
        web.to_json().unwrap(),
        json!({"replicas": 3, "image": "nginx:1.28"}),
    );
}

#[test]
fn fill_writes_into_definitions() {
    let ctx = Context::new();
    let v = compile("#transform: {\n\t#component: _\n\toutput: name: #component.name\n}\n");
    let tr = v.lookup_path("#transform").unwrap();
    let filled = tr.fill_path("#component", &ctx.encode(&json!({"name": "web"})));
    assert_eq!(
        filled.lookup_path("output").unwrap().to_json().unwrap(),
        json!({"name": "web"}),
    );
}

#[test]
fn root_unification_merges_namespaces() {
    // Loading author defaults as a second file gives one namespace: the
    // schema sees the defaults and references resolve across both.
    let ctx = Context::new();
    let module = ctx
        .compile("mod.cue", "#config: {replicas: int & >=1}\nvalues: #config\n")
        .unwrap();
    let defaults = ctx.compile("values.cue", "values: replicas: 2\n").unwrap();
    let merged = module.unify(&defaults);
    let injected = merged.fill_path("#config", &merged.lookup_path("values").unwrap());
    assert_eq!(
        injected.lookup_path("#config.replicas").unwrap().as_int().unwrap(),
        2,
    );
}

#[test]
fn defaults_resolve_on_export() {
    let v = compile("replicas: *1 | int\nimage: *\"nginx:latest\" | string\n");
    assert_eq!(
        v.to_json().unwrap(),
        json!({"replicas": 1, "image": "nginx:latest"}),
    );
}

#[test]
fn defaults_yield_to_concrete_values() {
    let ctx = Context::new();
    let module = ctx.compile("mod.cue", "replicas: *1 | int\n").unwrap();
    let user = ctx.compile("user.cue", "replicas: 5\n").unwrap();
    assert_eq!(module.unify(&user).to_json().unwrap(), json!({"replicas": 5}));
}

#[test]
fn constraints_reject_bad_values() {
    let ctx = Context::new();
    let v = ctx.compile("<t>", "replicas: int & >=1\n").unwrap();
    let ok = v.fill_path("replicas", &ctx.encode(&json!(3)));
    assert_eq!(ok.lookup_path("replicas").unwrap().as_int().unwrap(), 3);

    let bad = v.fill_path("replicas", &ctx.encode(&json!(0)));
    assert!(bad.lookup_path("replicas").unwrap().to_json().is_err());
}

#[test]
fn validate_concrete_reports_paths() {
    let v = compile("a: {b: string}\nc: 1\n");
    match v.validate_concrete() {
        Err(Error::NotConcrete(paths)) => assert_eq!(paths, vec!["a.b".to_string()]),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn definitions_and_hidden_fields_do_not_export() {
    let v = compile("#schema: {x: int}\n_internal: 1\nname: \"web\"\n");
    assert_eq!(v.to_json().unwrap(), json!({"name": "web"}));
}

#[test]
fn field_iteration_visibility() {
    let v = compile("#schema: {x: int}\n_internal: 1\nname: \"web\"\nport?: int\n");
    let regular = v.fields(FieldIter::default()).unwrap();
    let names: Vec<String> = regular.iter().map(|(s, _)| s.to_string()).collect();
    assert_eq!(names, vec!["name"]);

    let all = v
        .fields(FieldIter {
            definitions: true,
            hidden: true,
            optional: true,
        })
        .unwrap();
    assert_eq!(all.len(), 4);
}

#[test]
fn interpolation_and_string_concat() {
    let v = compile("fqn: \"opm.example/hello@v0\"\nid: \"\\(fqn):hello:default\"\n");
    assert_eq!(
        v.lookup_path("id").unwrap().as_string().unwrap(),
        "opm.example/hello@v0:hello:default",
    );
}

#[test]
fn uuid_builtin_is_deterministic() {
    let src = "import \"uuid\"\n\n\
               id: uuid.SHA1(\"c1cbe76d-5687-5a47-bfe6-83b081b15413\", \"opm.example/hello@v0:hello:default\")\n";
    let v = compile(src);
    assert_eq!(
        v.lookup_path("id").unwrap().as_string().unwrap(),
        "70291328-d618-5a2f-ac7e-2d6ddda02f43",
    );
}

#[test]
fn overlay_built_from_ast_computes_identity() {
    // The release overlay shape: a hidden struct computing the identity and
    // labels inside the language, referencing module metadata.
    let ctx = Context::new();
    let module = ctx
        .compile(
            "mod.cue",
            "package hello\n\nmetadata: {\n\
             \tfqn:     \"opm.example/hello@v0\"\n\
             \tversion: \"0.1.0\"\n\
             \tlabels: team: \"platform\"\n\
             }\n",
        )
        .unwrap();

    let overlay = ast::File {
        filename: "opm_release_overlay.cue".into(),
        package: Some("hello".into()),
        imports: vec!["uuid".into()],
        decls: vec![ast::field(
            Key::hidden("opm_release"),
            ast::strukt([
                ast::field(
                    Key::regular("id"),
                    ast::call(
                        ast::sel(ast::ident("uuid"), &["SHA1"]),
                        [
                            ast::str("c1cbe76d-5687-5a47-bfe6-83b081b15413"),
                            ast::interp([
                                ast::StrPart::Interp(ast::sel(ast::ident("metadata"), &["fqn"])),
                                ast::StrPart::Lit(":hello:default".into()),
                            ]),
                        ],
                    ),
                ),
                ast::field(
                    Key::regular("labels"),
                    ast::strukt([ast::field(
                        Key::regular("module-release.opmodel.dev/uuid"),
                        ast::ident("id"),
                    )]),
                ),
                ast::field(
                    Key::regular("mergedLabels"),
                    ast::binary(
                        BinOp::Or,
                        ast::default(ast::binary(
                            BinOp::And,
                            ast::sel(ast::ident("metadata"), &["labels"]),
                            ast::ident("labels"),
                        )),
                        ast::ident("labels"),
                    ),
                ),
            ]),
        )],
    };

    let v = module.unify(&ctx.build_file(overlay).unwrap());
    let id = v.lookup_path("_opm_release.id").unwrap().as_string().unwrap();
    assert_eq!(id, "70291328-d618-5a2f-ac7e-2d6ddda02f43");
    assert_eq!(
        v.lookup_path("_opm_release.mergedLabels").unwrap().to_json().unwrap(),
        json!({
            "team": "platform",
            "module-release.opmodel.dev/uuid": "70291328-d618-5a2f-ac7e-2d6ddda02f43",
        }),
    );
}

#[test]
fn leaf_unification_checks_constraints() {
    let ctx = Context::new();
    let label = ctx.compile_expr("\"stateless\"").unwrap();
    let any_string = ctx.compile_expr("string").unwrap();
    let exact = ctx.compile_expr("\"stateless\"").unwrap();
    let other = ctx.compile_expr("\"stateful\"").unwrap();

    assert!(label.unify(&any_string).error().is_none());
    assert!(label.unify(&exact).error().is_none());
    assert!(label.unify(&other).error().is_some());
}

#[test]
fn conflicting_values_are_bottom() {
    let ctx = Context::new();
    let a = ctx.compile("a.cue", "x: 1\n").unwrap();
    let b = ctx.compile("b.cue", "x: 2\n").unwrap();
    assert!(a.unify(&b).lookup_path("x").unwrap().to_json().is_err());
}

#[test]
fn structural_cycle_is_an_error() {
    let v = compile("a: b\nb: a\n");
    assert!(v.lookup_path("a").unwrap().to_json().is_err());
}

#[test]
fn paths_address_definitions() {
    let p = Path::parse("#components.web");
    assert_eq!(
        p.selectors()[0],
        Selector::Definition("components".into()),
    );
    let v = compile("#components: web: {name: \"web\"}\n");
    assert_eq!(
        v.lookup_path(p).unwrap().to_json().unwrap(),
        json!({"name": "web"}),
    );
}

#[test]
fn lists_and_indexing() {
    let v = compile("ports: [8080, 9090]\nfirst: ports[0]\n");
    assert_eq!(v.lookup_path("first").unwrap().as_int().unwrap(), 8080);
    assert_eq!(
        v.lookup_path("ports").unwrap().to_json().unwrap(),
        json!([8080, 9090]),
    );
}
