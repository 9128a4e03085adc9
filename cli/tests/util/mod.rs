//! Shared fixtures for the integration tests.
#![allow(dead_code)] // each test binary uses a subset

use std::fs;
use std::path::{Path, PathBuf};

pub const MODULE: &str = "\
package hello

metadata: {
	name:             \"hello\"
	fqn:              \"opm.example/hello@v0\"
	version:          \"0.1.0\"
	defaultNamespace: \"default\"
	labels: {}
}

#config: {
	replicaCount: int & >=1
	image:        string
}

values: #config

#components: web: {
	labels: \"workload-type\": \"stateless\"
	resources: \"opm.dev/core#Container\": {
		image:    #config.image
		replicas: #config.replicaCount
	}
}
";

pub const MODULE_WITH_DB: &str = "\
package hello

metadata: {
	name:             \"hello\"
	fqn:              \"opm.example/hello@v0\"
	version:          \"0.1.0\"
	defaultNamespace: \"default\"
	labels: {}
}

#config: {
	replicaCount: int & >=1
	image:        string
}

values: #config

#components: web: {
	labels: \"workload-type\": \"stateless\"
	resources: \"opm.dev/core#Container\": {
		image:    #config.image
		replicas: #config.replicaCount
	}
}

#components: db: {
	labels: \"workload-type\": \"stateless\"
	resources: \"opm.dev/core#Container\": {
		image:    \"postgres:17\"
		replicas: 1
	}
}
";

pub const VALUES: &str = "\
package hello

values: {
	replicaCount: 1
	image:        \"nginx:latest\"
}
";

const CONFIG: &str = "\
registry: \"registry.example/modules\"

providers: kubernetes: {
	version: \"0.1.0\"
	transformers: deployment: {
		requiredLabels: \"workload-type\": \"stateless\"
		requiredResources: [\"opm.dev/core#Container\"]
		#transform: {
			#component: _
			#context: _
			_container: #component.resources[\"opm.dev/core#Container\"]
			output: {
				apiVersion: \"apps/v1\"
				kind:       \"Deployment\"
				metadata: {
					name:      #context.#componentMetadata.name
					namespace: #context.namespace
				}
				spec: {
					replicas: _container.replicas
					selector: matchLabels: app: #context.#componentMetadata.name
					template: {
						metadata: labels: app: #context.#componentMetadata.name
						spec: containers: [{
							name:  #context.#componentMetadata.name
							image: _container.image
						}]
					}
				}
			}
		}
	}
}
";

pub fn write_module(dir: &Path, module: &str) {
    fs::create_dir_all(dir.join("cue.mod")).unwrap();
    fs::write(dir.join("module.cue"), module).unwrap();
    fs::write(dir.join("values.cue"), VALUES).unwrap();
}

pub fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.cue");
    fs::write(&path, CONFIG).unwrap();
    path
}

pub fn load_config(config_path: &Path) -> cli::config::GlobalConfig {
    let flags = cli::config::Flags {
        config: Some(config_path.display().to_string()),
        ..Default::default()
    };
    cli::config::GlobalConfig::load(&flags).unwrap()
}
